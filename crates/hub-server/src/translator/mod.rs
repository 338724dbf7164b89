//! Domain events in, notifications out.
//!
//! A CRUD service (over `POST /events`) or a sweep hands over a
//! [`DomainEvent`]. The [`TranslationTable`] says who hears about it and with
//! which template; every recipient gets exactly one notification, persisted
//! and pushed through the [`NotificationService`].
//!
//! Dispatch never fails its caller. Unknown combinations, empty recipient
//! sets and store errors are logged and dropped.

pub mod render;
pub mod table;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use hub_shared::constants::APP_NAME;
use hub_shared::UserId;

use crate::notify::NotificationService;

pub use render::render;
pub use table::{Rule, TemplateKey, TranslationTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Activity,
    Task,
    Agreement,
    Invoice,
    General,
    Referral,
}

impl Module {
    pub const ALL: [Module; 6] = [
        Module::Activity,
        Module::Task,
        Module::Agreement,
        Module::Invoice,
        Module::General,
        Module::Referral,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Cancel,
    Delete,
    StatusUpdate,
    Overdue,
    DueDateAlert,
    Earned,
    Expire,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::Create,
        Action::Update,
        Action::Cancel,
        Action::Delete,
        Action::StatusUpdate,
        Action::Overdue,
        Action::DueDateAlert,
        Action::Earned,
        Action::Expire,
    ];
}

/// Who performed the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogUser {
    #[default]
    Agency,
    /// A team member acting for an agency; the agency is told as well.
    Member,
    Client,
    System,
}

/// A participant slot on the source entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    AssignBy,
    AssignTo,
    Client,
    Agency,
    Sender,
    Receiver,
    Watchers,
    Attendees,
    Referrer,
    Owner,
}

impl Role {
    /// Collective roles never include the actor.
    fn is_collective(&self) -> bool {
        matches!(self, Role::Watchers | Role::Attendees)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Participants {
    pub assign_by: Option<UserId>,
    #[serde(deserialize_with = "one_or_many")]
    pub assign_to: Vec<UserId>,
    pub client: Option<UserId>,
    pub agency: Option<UserId>,
    pub sender: Option<UserId>,
    pub receiver: Option<UserId>,
    pub watchers: Vec<UserId>,
    pub attendees: Vec<UserId>,
    pub referrer: Option<UserId>,
    pub owner: Option<UserId>,
}

impl Participants {
    pub fn resolve(&self, role: Role) -> Vec<&UserId> {
        match role {
            Role::AssignBy => self.assign_by.iter().collect(),
            Role::AssignTo => self.assign_to.iter().collect(),
            Role::Client => self.client.iter().collect(),
            Role::Agency => self.agency.iter().collect(),
            Role::Sender => self.sender.iter().collect(),
            Role::Receiver => self.receiver.iter().collect(),
            Role::Watchers => self.watchers.iter().collect(),
            Role::Attendees => self.attendees.iter().collect(),
            Role::Referrer => self.referrer.iter().collect(),
            Role::Owner => self.owner.iter().collect(),
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<UserId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(UserId),
        Many(Vec<UserId>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(user)) => vec![user],
        Some(OneOrMany::Many(users)) => users,
        None => Vec::new(),
    })
}

/// A state change on a domain entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub module: Module,
    pub action: Action,
    /// Id of the entity the event is about.
    pub reference_id: String,
    #[serde(default)]
    pub log_user: LogUser,
    #[serde(default)]
    pub actor: Option<UserId>,
    #[serde(default)]
    pub participants: Participants,
    /// Template values (`title`, `date`, `invoice_number`, ...).
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl DomainEvent {
    pub fn new(module: Module, action: Action, reference_id: impl Into<String>) -> Self {
        Self {
            module,
            action,
            reference_id: reference_id.into(),
            log_user: LogUser::System,
            actor: None,
            participants: Participants::default(),
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// The user to keep out of collective roles. Falls back to the assigner.
    fn effective_actor(&self) -> Option<&UserId> {
        self.actor.as_ref().or(self.participants.assign_by.as_ref())
    }
}

/// Everyone the event reaches, each once, with the template that applies.
pub fn resolve_recipients(rule: &Rule, event: &DomainEvent) -> Vec<(UserId, TemplateKey)> {
    let actor = event.effective_actor();
    let mut seen: HashSet<&UserId> = HashSet::new();
    let mut recipients = Vec::new();

    let extra = match event.log_user {
        LogUser::Member => rule.member_extra,
        _ => None,
    };

    for delivery in rule.deliveries.iter().chain(extra.iter()) {
        for user in event.participants.resolve(delivery.role) {
            if user.is_blank() {
                continue;
            }
            if delivery.role.is_collective() && Some(user) == actor {
                continue;
            }
            if seen.insert(user) {
                recipients.push((user.clone(), delivery.template));
            }
        }
    }
    recipients
}

pub struct Translator {
    table: TranslationTable,
    notifier: NotificationService,
}

impl Translator {
    pub fn new(table: TranslationTable, notifier: NotificationService) -> Self {
        Self { table, notifier }
    }

    /// Translate and deliver. Resolves once every recipient's notification
    /// has been attempted; returns how many were created.
    pub async fn dispatch(&self, event: &DomainEvent) -> usize {
        let Some(rule) = self.table.get(event.module, event.action) else {
            warn!(
                module = ?event.module,
                action = ?event.action,
                reference = %event.reference_id,
                "No translation rule, event dropped"
            );
            return 0;
        };
        if event.reference_id.trim().is_empty() {
            warn!(module = ?event.module, action = ?event.action, "Event without reference id dropped");
            return 0;
        }

        if event.action == Action::Delete {
            self.retire_previous(&event.reference_id).await;
        }

        let recipients = resolve_recipients(rule, event);
        if recipients.is_empty() {
            debug!(
                module = ?event.module,
                action = ?event.action,
                reference = %event.reference_id,
                "Event has no recipients"
            );
            return 0;
        }

        let (vars, names) = self.render_context(event, &recipients).await;
        let subject = format!("{APP_NAME}: {} update", rule.notification_type);

        let deliveries = recipients.iter().map(|(user, template)| {
            let mut vars = vars.clone();
            if let Some(name) = names.get(user) {
                vars.insert("recipient_name".to_string(), name.clone());
            }
            let message = render(template.template(), &vars);
            let subject = subject.as_str();

            async move {
                match self
                    .notifier
                    .create_and_push(
                        user,
                        rule.notification_type,
                        &event.reference_id,
                        &message,
                        event.actor.as_ref(),
                    )
                    .await
                {
                    Ok(_) => {
                        if rule.email {
                            self.notifier.email(user, subject, &message).await;
                        }
                        true
                    }
                    Err(e) => {
                        error!(
                            user = %user,
                            reference = %event.reference_id,
                            error = %e,
                            "Failed to create notification"
                        );
                        false
                    }
                }
            }
        });

        let delivered = join_all(deliveries).await.into_iter().filter(|ok| *ok).count();

        info!(
            module = ?event.module,
            action = ?event.action,
            reference = %event.reference_id,
            recipients = recipients.len(),
            delivered,
            "Event translated"
        );
        delivered
    }

    /// Fire-and-forget dispatch for request handlers.
    pub fn spawn_dispatch(self: &Arc<Self>, event: DomainEvent) -> JoinHandle<usize> {
        let translator = Arc::clone(self);
        tokio::spawn(async move { translator.dispatch(&event).await })
    }

    async fn retire_previous(&self, reference_id: &str) {
        let db = self.notifier.db().lock().await;
        match db.soft_delete_notifications_for_reference(reference_id) {
            Ok(n) if n > 0 => debug!(reference = %reference_id, retired = n, "Retired notifications"),
            Ok(_) => {}
            Err(e) => warn!(reference = %reference_id, error = %e, "Failed to retire notifications"),
        }
    }

    /// Template variables shared by all recipients, and display names by id.
    async fn render_context(
        &self,
        event: &DomainEvent,
        recipients: &[(UserId, TemplateKey)],
    ) -> (BTreeMap<String, String>, HashMap<UserId, String>) {
        let p = &event.participants;
        let named: [(&str, Option<&UserId>); 5] = [
            ("actor_name", event.effective_actor()),
            ("assign_by_name", p.assign_by.as_ref()),
            ("assign_to_name", p.assign_to.first()),
            ("client_name", p.client.as_ref()),
            ("agency_name", p.agency.as_ref()),
        ];

        let mut names: HashMap<UserId, String> = HashMap::new();
        {
            let db = self.notifier.db().lock().await;
            let ids = recipients
                .iter()
                .map(|(user, _)| user)
                .chain(named.iter().filter_map(|(_, user)| *user));
            for id in ids {
                if names.contains_key(id) {
                    continue;
                }
                match db.find_user(id) {
                    Ok(Some(user)) => {
                        names.insert(id.clone(), user.display_name());
                    }
                    Ok(None) => {}
                    Err(e) => warn!(user = %id, error = %e, "Name lookup failed"),
                }
            }
        }

        let mut vars = event.fields.clone();
        for (key, user) in named {
            if let Some(name) = user.and_then(|u| names.get(u)) {
                vars.entry(key.to_string()).or_insert_with(|| name.clone());
            }
        }
        (vars, names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ServerEvent;
    use crate::mailer::testing::MemoryMailer;
    use crate::rooms::RoomRegistry;
    use crate::testing::{connect, drain, seed_user, test_db};
    use crate::Db;
    use hub_shared::NotificationType;

    fn translator(db: &Db, rooms: &RoomRegistry, mailer: MemoryMailer) -> Translator {
        let notifier =
            NotificationService::new(db.clone(), Arc::new(rooms.clone()), Arc::new(mailer));
        Translator::new(TranslationTable::standard(), notifier)
    }

    fn task_created(actor: &str, assignee: &str, watchers: &[&str]) -> DomainEvent {
        let mut event = DomainEvent::new(Module::Task, Action::Create, "task-1")
            .field("title", "Logo refresh");
        event.log_user = LogUser::Agency;
        event.actor = Some(actor.into());
        event.participants.assign_by = Some(actor.into());
        event.participants.assign_to = vec![assignee.into()];
        event.participants.watchers = watchers.iter().map(|w| UserId::from(*w)).collect();
        event
    }

    #[test]
    fn test_collective_roles_skip_actor_and_dedup() {
        let table = TranslationTable::standard();
        let rule = table.get(Module::Task, Action::Create).unwrap();
        let mut event = task_created("alice", "bob", &["alice", "bob", "carol"]);
        event.participants.client = Some("carol".into());

        let recipients = resolve_recipients(rule, &event);
        assert_eq!(
            recipients,
            vec![
                (UserId::from("bob"), TemplateKey::TaskAssigned),
                (UserId::from("carol"), TemplateKey::TaskCreatedClient),
            ]
        );
    }

    #[test]
    fn test_member_log_adds_agency() {
        let table = TranslationTable::standard();
        let rule = table.get(Module::Task, Action::Create).unwrap();
        let mut event = task_created("member", "bob", &[]);
        event.participants.agency = Some("agency".into());

        assert_eq!(resolve_recipients(rule, &event).len(), 1);

        event.log_user = LogUser::Member;
        let recipients = resolve_recipients(rule, &event);
        assert_eq!(recipients.len(), 2);
        assert_eq!(
            recipients[1],
            (UserId::from("agency"), TemplateKey::TaskMemberAgency)
        );
    }

    #[test]
    fn test_event_json_accepts_single_assignee() {
        let event: DomainEvent = serde_json::from_value(serde_json::json!({
            "module": "task",
            "action": "status_update",
            "reference_id": "t9",
            "log_user": "member",
            "participants": { "assign_to": "bob", "watchers": ["carol"] },
            "fields": { "status": "done" }
        }))
        .unwrap();
        assert_eq!(event.participants.assign_to, vec![UserId::from("bob")]);
        assert_eq!(event.log_user, LogUser::Member);
        assert_eq!(event.action, Action::StatusUpdate);
    }

    #[tokio::test]
    async fn test_task_assignment_scenario() {
        let db = test_db();
        seed_user(&db, "alice", "Alice", None).await;
        seed_user(&db, "bob", "Bob", None).await;
        let rooms = RoomRegistry::new();
        let (_a, mut alice_rx) = connect(&rooms, "alice");
        let (_b, mut bob_rx) = connect(&rooms, "bob");
        let t = translator(&db, &rooms, MemoryMailer::default());

        let delivered = t.dispatch(&task_created("alice", "bob", &["alice"])).await;
        assert_eq!(delivered, 1);

        let bob_events = drain(&mut bob_rx);
        assert_eq!(bob_events.len(), 1);
        match &bob_events[0] {
            ServerEvent::Notification(push) => {
                assert_eq!(push.un_read_count, 1);
                assert_eq!(push.notification.notification_type, NotificationType::Task);
                assert_eq!(push.notification.data_reference_id, "task-1");
                assert_eq!(
                    push.notification.message,
                    "Hi Bob, Alice assigned you Logo refresh"
                );
                assert!(push.notification.message.contains("Bob"));
                assert_eq!(push.notification.from_user, Some(UserId::from("alice")));
            }
            other => panic!("unexpected event {other:?}"),
        }

        assert!(drain(&mut alice_rx).is_empty());
        let db = db.lock().await;
        assert_eq!(db.count_unread(&"alice".into()).unwrap(), 0);
        assert_eq!(db.count_unread(&"bob".into()).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_assignment_without_synced_assignee_name() {
        let db = test_db();
        seed_user(&db, "alice", "Alice", None).await;
        let rooms = RoomRegistry::new();
        let (_b, mut bob_rx) = connect(&rooms, "bob");
        let t = translator(&db, &rooms, MemoryMailer::default());

        t.dispatch(&task_created("alice", "bob", &[])).await;

        match &drain(&mut bob_rx)[0] {
            ServerEvent::Notification(push) => {
                assert_eq!(push.notification.message, "Hi, Alice assigned you Logo refresh");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_cross_delivery() {
        let db = test_db();
        let rooms = RoomRegistry::new();
        let users = ["bob", "carol", "dave", "erin"];
        let mut receivers: Vec<_> = users.iter().map(|u| (*u, connect(&rooms, u).1)).collect();
        let t = translator(&db, &rooms, MemoryMailer::default());

        let mut event = task_created("alice", "bob", &["carol", "dave", "bob", "carol"]);
        event.participants.client = Some("erin".into());
        event.participants.agency = Some("dave".into());
        event.log_user = LogUser::Member;

        assert_eq!(t.dispatch(&event).await, 4);

        for (user, rx) in receivers.iter_mut() {
            let events = drain(rx);
            assert_eq!(events.len(), 1, "{user} should get exactly one push");
            match &events[0] {
                ServerEvent::Notification(push) => {
                    assert_eq!(push.notification.user_id, UserId::from(*user));
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_delete_retires_earlier_notifications() {
        let db = test_db();
        let rooms = RoomRegistry::new();
        let t = translator(&db, &rooms, MemoryMailer::default());

        t.dispatch(&task_created("alice", "bob", &[])).await;
        let mut delete = task_created("alice", "bob", &[]);
        delete.action = Action::Delete;
        assert_eq!(t.dispatch(&delete).await, 1);

        let db = db.lock().await;
        let listed = db.list_notifications(&"bob".into(), 0, 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].notification_type, NotificationType::Deleted);
        assert_eq!(db.count_unread(&"bob".into()).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_combination_is_dropped() {
        let db = test_db();
        let rooms = RoomRegistry::new();
        let t = translator(&db, &rooms, MemoryMailer::default());

        let mut event = DomainEvent::new(Module::Referral, Action::Overdue, "r1");
        event.participants.referrer = Some("bob".into());
        assert_eq!(t.dispatch(&event).await, 0);
        assert_eq!(db.lock().await.count_unread(&"bob".into()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_email_rules_send_mail() {
        let db = test_db();
        seed_user(&db, "carol", "Carol", Some("carol@example.com")).await;
        let rooms = RoomRegistry::new();
        let mailer = MemoryMailer::default();
        let t = translator(&db, &rooms, mailer.clone());

        let mut event = DomainEvent::new(Module::Invoice, Action::Overdue, "inv-1")
            .field("invoice_number", "INV-7");
        event.participants.client = Some("carol".into());
        event.participants.agency = Some("agency".into());

        assert_eq!(t.dispatch(&event).await, 2);
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "Invoice INV-7 is overdue");
    }

    #[tokio::test]
    async fn test_spawned_dispatch_completes() {
        let db = test_db();
        let rooms = RoomRegistry::new();
        let t = Arc::new(translator(&db, &rooms, MemoryMailer::default()));

        let mut event = DomainEvent::new(Module::General, Action::Create, "n1")
            .field("message", "Maintenance tonight");
        event.participants.receiver = Some("bob".into());

        assert_eq!(t.spawn_dispatch(event).await.unwrap(), 1);
        let listed = db.lock().await.list_notifications(&"bob".into(), 0, 10).unwrap();
        assert_eq!(listed[0].message, "Maintenance tonight");
    }
}
