//! The `(Module, Action)` dispatch table.
//!
//! Every supported combination maps to the notification type it produces and
//! an ordered list of `(Role, TemplateKey)` deliveries. Order matters: when a
//! user is named by more than one role, the first delivery wins.

use std::collections::HashMap;

use hub_shared::NotificationType;

use super::{Action, Module, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKey {
    ActivityCreated,
    ActivityUpdated,
    ActivityCancelled,
    ActivityDeleted,
    ActivityReminder,
    ActivityMemberAgency,

    TaskAssigned,
    TaskCreatedClient,
    TaskWatching,
    TaskUpdated,
    TaskUpdatedAssigner,
    TaskStatusChanged,
    TaskStatusAssigner,
    TaskDeleted,
    TaskOverdueAssigner,
    TaskOverdueAssignee,
    TaskDueToday,
    TaskMemberAgency,

    AgreementReceived,
    AgreementUpdated,
    AgreementStatusChanged,
    AgreementDeleted,
    AgreementMemberAgency,

    InvoiceReceived,
    InvoiceUpdated,
    InvoiceStatusChanged,
    InvoiceOverdueClient,
    InvoiceOverdueAgency,
    InvoiceDeleted,
    InvoiceMemberAgency,

    GeneralNotice,
    TrialExpired,

    ReferralJoined,
    ReferralEarned,
}

impl TemplateKey {
    pub fn template(&self) -> &'static str {
        match self {
            Self::ActivityCreated => "{{actor_name}} scheduled {{title}} on {{date}}",
            Self::ActivityUpdated => "{{actor_name}} updated {{title}}",
            Self::ActivityCancelled => "{{title}} on {{date}} has been cancelled",
            Self::ActivityDeleted => "{{title}} has been removed",
            Self::ActivityReminder => "Reminder: {{title}} is due today",
            Self::ActivityMemberAgency => "{{actor_name}} scheduled {{title}} for {{client_name}}",

            Self::TaskAssigned => "Hi {{recipient_name}}, {{actor_name}} assigned you {{title}}",
            Self::TaskCreatedClient => "{{actor_name}} created {{title}} for you",
            Self::TaskWatching => "You were added as a watcher on {{title}}",
            Self::TaskUpdated => "{{actor_name}} updated {{title}}",
            Self::TaskUpdatedAssigner => "{{title}}, which you assigned to {{assign_to_name}}, was updated",
            Self::TaskStatusChanged => "{{title}} moved to {{status}}",
            Self::TaskStatusAssigner => "{{assign_to_name}} moved {{title}} to {{status}}",
            Self::TaskDeleted => "{{title}} has been deleted",
            Self::TaskOverdueAssigner => "{{title}} assigned to {{assign_to_name}} is overdue",
            Self::TaskOverdueAssignee => "Your task {{title}} is overdue",
            Self::TaskDueToday => "{{title}} is due today",
            Self::TaskMemberAgency => "{{actor_name}} created {{title}} for {{assign_to_name}}",

            Self::AgreementReceived => "{{actor_name}} sent you an agreement: {{title}}",
            Self::AgreementUpdated => "{{actor_name}} updated the agreement {{title}}",
            Self::AgreementStatusChanged => "{{actor_name}} {{status}} the agreement {{title}}",
            Self::AgreementDeleted => "The agreement {{title}} has been withdrawn",
            Self::AgreementMemberAgency => "{{actor_name}} sent {{title}} to {{client_name}}",

            Self::InvoiceReceived => "You received invoice {{invoice_number}} from {{actor_name}}",
            Self::InvoiceUpdated => "Invoice {{invoice_number}} was updated",
            Self::InvoiceStatusChanged => "Invoice {{invoice_number}} is now {{status}}",
            Self::InvoiceOverdueClient => "Invoice {{invoice_number}} is overdue",
            Self::InvoiceOverdueAgency => "Invoice {{invoice_number}} for {{client_name}} is overdue",
            Self::InvoiceDeleted => "Invoice {{invoice_number}} has been cancelled",
            Self::InvoiceMemberAgency => "{{actor_name}} sent invoice {{invoice_number}} to {{client_name}}",

            Self::GeneralNotice => "{{message}}",
            Self::TrialExpired => "Hi {{recipient_name}}, your free trial has ended",

            Self::ReferralJoined => "{{referred_name}} joined with your referral",
            Self::ReferralEarned => "You earned {{amount}} from a referral",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub role: Role,
    pub template: TemplateKey,
}

fn to(role: Role, template: TemplateKey) -> Delivery {
    Delivery { role, template }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub notification_type: NotificationType,
    pub deliveries: Vec<Delivery>,
    /// Extra delivery when a team member, not the agency, performed the action.
    pub member_extra: Option<Delivery>,
    /// Also send each recipient an email.
    pub email: bool,
}

impl Rule {
    fn new(notification_type: NotificationType, deliveries: Vec<Delivery>) -> Self {
        Self {
            notification_type,
            deliveries,
            member_extra: None,
            email: false,
        }
    }

    fn member(mut self, extra: Delivery) -> Self {
        self.member_extra = Some(extra);
        self
    }

    fn email(mut self) -> Self {
        self.email = true;
        self
    }
}

fn rule(module: Module, action: Action) -> Option<Rule> {
    use Action as A;
    use Module as M;
    use NotificationType as N;
    use Role as R;
    use TemplateKey as T;

    let rule = match (module, action) {
        (M::Activity, A::Create) => Rule::new(
            N::Activity,
            vec![to(R::Attendees, T::ActivityCreated), to(R::Client, T::ActivityCreated)],
        )
        .member(to(R::Agency, T::ActivityMemberAgency)),
        (M::Activity, A::Update) => Rule::new(
            N::Activity,
            vec![to(R::Attendees, T::ActivityUpdated), to(R::Client, T::ActivityUpdated)],
        ),
        (M::Activity, A::Cancel) => Rule::new(
            N::Activity,
            vec![to(R::Attendees, T::ActivityCancelled), to(R::Client, T::ActivityCancelled)],
        ),
        (M::Activity, A::Delete) => Rule::new(
            N::Deleted,
            vec![to(R::Attendees, T::ActivityDeleted), to(R::Client, T::ActivityDeleted)],
        ),
        (M::Activity, A::DueDateAlert) => Rule::new(
            N::Activity,
            vec![to(R::AssignBy, T::ActivityReminder), to(R::Attendees, T::ActivityReminder)],
        )
        .email(),

        (M::Task, A::Create) => Rule::new(
            N::Task,
            vec![
                to(R::AssignTo, T::TaskAssigned),
                to(R::Client, T::TaskCreatedClient),
                to(R::Watchers, T::TaskWatching),
            ],
        )
        .member(to(R::Agency, T::TaskMemberAgency)),
        (M::Task, A::Update) => Rule::new(
            N::Task,
            vec![
                to(R::AssignBy, T::TaskUpdatedAssigner),
                to(R::AssignTo, T::TaskUpdated),
                to(R::Client, T::TaskUpdated),
                to(R::Watchers, T::TaskUpdated),
            ],
        ),
        (M::Task, A::StatusUpdate) => Rule::new(
            N::Task,
            vec![
                to(R::AssignBy, T::TaskStatusAssigner),
                to(R::AssignTo, T::TaskStatusChanged),
                to(R::Client, T::TaskStatusChanged),
                to(R::Watchers, T::TaskStatusChanged),
            ],
        ),
        (M::Task, A::Delete) => Rule::new(
            N::Deleted,
            vec![
                to(R::AssignTo, T::TaskDeleted),
                to(R::Client, T::TaskDeleted),
                to(R::Watchers, T::TaskDeleted),
            ],
        ),
        (M::Task, A::Overdue) => Rule::new(
            N::Task,
            vec![
                to(R::AssignBy, T::TaskOverdueAssigner),
                to(R::AssignTo, T::TaskOverdueAssignee),
            ],
        )
        .email(),
        (M::Task, A::DueDateAlert) => {
            Rule::new(N::Task, vec![to(R::AssignTo, T::TaskDueToday)]).email()
        }

        (M::Agreement, A::Create) => Rule::new(N::Agreement, vec![to(R::Receiver, T::AgreementReceived)])
            .member(to(R::Agency, T::AgreementMemberAgency)),
        (M::Agreement, A::Update) => {
            Rule::new(N::Agreement, vec![to(R::Receiver, T::AgreementUpdated)])
        }
        (M::Agreement, A::StatusUpdate) => {
            Rule::new(N::Agreement, vec![to(R::Sender, T::AgreementStatusChanged)])
        }
        (M::Agreement, A::Delete) => {
            Rule::new(N::Deleted, vec![to(R::Receiver, T::AgreementDeleted)])
        }

        (M::Invoice, A::Create) => Rule::new(N::Invoice, vec![to(R::Client, T::InvoiceReceived)])
            .member(to(R::Agency, T::InvoiceMemberAgency))
            .email(),
        (M::Invoice, A::Update) => Rule::new(N::Invoice, vec![to(R::Client, T::InvoiceUpdated)]),
        (M::Invoice, A::StatusUpdate) => {
            Rule::new(N::Payment, vec![to(R::Agency, T::InvoiceStatusChanged)])
        }
        (M::Invoice, A::Overdue) => Rule::new(
            N::Invoice,
            vec![
                to(R::Client, T::InvoiceOverdueClient),
                to(R::Agency, T::InvoiceOverdueAgency),
            ],
        )
        .email(),
        (M::Invoice, A::Delete) => Rule::new(N::Deleted, vec![to(R::Client, T::InvoiceDeleted)]),

        (M::General, A::Create) => Rule::new(N::General, vec![to(R::Receiver, T::GeneralNotice)]),
        (M::General, A::Expire) => {
            Rule::new(N::General, vec![to(R::Owner, T::TrialExpired)]).email()
        }

        (M::Referral, A::Create) => Rule::new(N::Referral, vec![to(R::Referrer, T::ReferralJoined)]),
        (M::Referral, A::Earned) => Rule::new(N::Referral, vec![to(R::Referrer, T::ReferralEarned)]),

        _ => return None,
    };
    Some(rule)
}

/// Lookup table built once at startup.
#[derive(Debug, Clone)]
pub struct TranslationTable {
    rules: HashMap<(Module, Action), Rule>,
}

impl TranslationTable {
    pub fn standard() -> Self {
        let mut rules = HashMap::new();
        for module in Module::ALL {
            for action in Action::ALL {
                if let Some(r) = rule(module, action) {
                    rules.insert((module, action), r);
                }
            }
        }
        Self { rules }
    }

    pub fn get(&self, module: Module, action: Action) -> Option<&Rule> {
        self.rules.get(&(module, action))
    }

}

impl Default for TranslationTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_covers_expected_combinations() {
        let table = TranslationTable::standard();
        let supported = Module::ALL
            .iter()
            .flat_map(|m| Action::ALL.iter().map(move |a| (*m, *a)))
            .filter(|(m, a)| table.get(*m, *a).is_some())
            .count();
        assert_eq!(supported, 24);
        assert!(table.get(Module::Task, Action::Create).is_some());
        assert!(table.get(Module::Referral, Action::Overdue).is_none());
    }

    #[test]
    fn test_delete_rules_use_deleted_type() {
        let table = TranslationTable::standard();
        for module in Module::ALL {
            if let Some(rule) = table.get(module, Action::Delete) {
                assert_eq!(rule.notification_type, NotificationType::Deleted);
            }
        }
    }

    #[test]
    fn test_every_rule_has_a_delivery() {
        let table = TranslationTable::standard();
        for module in Module::ALL {
            for action in Action::ALL {
                if let Some(rule) = table.get(module, action) {
                    assert!(!rule.deliveries.is_empty(), "{module:?}/{action:?}");
                }
            }
        }
    }

    #[test]
    fn test_sweep_rules_send_email() {
        let table = TranslationTable::standard();
        assert!(table.get(Module::Invoice, Action::Overdue).unwrap().email);
        assert!(table.get(Module::Task, Action::Overdue).unwrap().email);
        assert!(table.get(Module::Task, Action::DueDateAlert).unwrap().email);
        assert!(table.get(Module::General, Action::Expire).unwrap().email);
        assert!(!table.get(Module::Task, Action::Create).unwrap().email);
    }
}
