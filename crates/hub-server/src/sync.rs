//! Entity rows the hub keeps in step with the CRUD services.
//!
//! Two inputs write them. `POST /entities` carries explicit snapshots of
//! users, groups, tasks and invoices. Task and invoice events on
//! `POST /events` are also projected onto their rows, so the sweeps see
//! what the translator saw.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::debug;

use hub_shared::{GroupId, UserId};
use hub_store::invoices::NewInvoice;
use hub_store::tasks::NewTask;
use hub_store::{Database, NewUser, StoreError};

use crate::translator::{Action, DomainEvent, Module};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EntitySync {
    User(UserRecord),
    Group(GroupRecord),
    Task(NewTask),
    Invoice(InvoiceRecord),
    Removed(Removal),
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    #[serde(flatten)]
    pub profile: NewUser,
    /// Starts (or moves) the free trial window.
    #[serde(default)]
    pub trial_ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupRecord {
    pub id: GroupId,
    pub name: String,
    pub created_by: UserId,
    #[serde(default)]
    pub members: Vec<UserId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceRecord {
    #[serde(flatten)]
    pub invoice: NewInvoice,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Group,
    Task,
    Invoice,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Removal {
    pub entity: EntityKind,
    pub id: String,
}

/// Write one snapshot. Returns whether a row changed.
pub fn apply(db: &mut Database, entity: &EntitySync) -> Result<bool, StoreError> {
    match entity {
        EntitySync::User(record) => {
            if record.profile.id.trim().is_empty() {
                return Ok(false);
            }
            let user = db.upsert_user(&record.profile)?;
            if let Some(ends_at) = record.trial_ends_at {
                db.start_trial(&user.id, ends_at)?;
            }
            Ok(true)
        }
        EntitySync::Group(record) => {
            db.sync_group(&record.id, &record.name, &record.created_by, &record.members)?;
            Ok(true)
        }
        EntitySync::Task(task) => {
            db.upsert_task(task)?;
            Ok(true)
        }
        EntitySync::Invoice(record) => {
            db.upsert_invoice(&record.invoice)?;
            if let Some(status) = &record.status {
                db.set_invoice_status(&record.invoice.id, status)?;
            }
            Ok(true)
        }
        EntitySync::Removed(removal) => match removal.entity {
            EntityKind::Group => db.delete_group(&GroupId(removal.id.clone())),
            EntityKind::Task => db.delete_task(&removal.id),
            EntityKind::Invoice => db.delete_invoice(&removal.id),
        },
    }
}

/// Mirror a task or invoice event onto its row. Events about other modules,
/// or too sparse to build a new row from, change nothing.
pub fn project_event(db: &Database, event: &DomainEvent) -> Result<bool, StoreError> {
    let id = event.reference_id.as_str();
    if id.trim().is_empty() {
        return Ok(false);
    }
    let status = event.fields.get("status");

    match (event.module, event.action) {
        (Module::Task, Action::Create | Action::Update) => {
            let Some(task) = merged_task(db, event)? else {
                debug!(reference = %id, "Task event too sparse to store");
                return Ok(false);
            };
            db.upsert_task(&task)?;
            if let Some(status) = status {
                db.set_task_status(id, status)?;
            }
            Ok(true)
        }
        (Module::Task, Action::StatusUpdate) => match status {
            Some(status) => db.set_task_status(id, status),
            None => Ok(false),
        },
        (Module::Task, Action::Delete) => db.delete_task(id),

        (Module::Invoice, Action::Create | Action::Update) => {
            let Some(invoice) = merged_invoice(db, event)? else {
                debug!(reference = %id, "Invoice event too sparse to store");
                return Ok(false);
            };
            db.upsert_invoice(&invoice)?;
            if let Some(status) = status {
                db.set_invoice_status(id, status)?;
            }
            Ok(true)
        }
        (Module::Invoice, Action::StatusUpdate) => match status {
            Some(status) => db.set_invoice_status(id, status),
            None => Ok(false),
        },
        (Module::Invoice, Action::Delete) => db.delete_invoice(id),

        _ => Ok(false),
    }
}

/// `YYYY-MM-DD`, or the date part of an RFC 3339 timestamp.
fn parse_day(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|ts| ts.date_naive()))
}

fn existing<T>(found: Result<T, StoreError>) -> Result<Option<T>, StoreError> {
    match found {
        Ok(row) => Ok(Some(row)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

fn merged_task(db: &Database, event: &DomainEvent) -> Result<Option<NewTask>, StoreError> {
    let p = &event.participants;
    let title = event.fields.get("title").cloned();
    let due_date = event.fields.get("due_date").and_then(|d| parse_day(d));

    let Some(mut task) = existing(db.get_task(&event.reference_id))?.map(NewTask::from) else {
        let (Some(title), Some(assign_by), Some(assign_to), Some(due_date)) =
            (title, p.assign_by.clone(), p.assign_to.first().cloned(), due_date)
        else {
            return Ok(None);
        };
        return Ok(Some(NewTask {
            id: event.reference_id.clone(),
            title,
            assign_by,
            assign_to,
            client_id: p.client.clone(),
            agency_id: p.agency.clone(),
            watchers: p.watchers.clone(),
            due_date,
        }));
    };

    if let Some(title) = title {
        task.title = title;
    }
    if let Some(assign_by) = &p.assign_by {
        task.assign_by = assign_by.clone();
    }
    if let Some(assign_to) = p.assign_to.first() {
        task.assign_to = assign_to.clone();
    }
    if p.client.is_some() {
        task.client_id = p.client.clone();
    }
    if p.agency.is_some() {
        task.agency_id = p.agency.clone();
    }
    if !p.watchers.is_empty() {
        task.watchers = p.watchers.clone();
    }
    if let Some(due_date) = due_date {
        task.due_date = due_date;
    }
    Ok(Some(task))
}

fn merged_invoice(db: &Database, event: &DomainEvent) -> Result<Option<NewInvoice>, StoreError> {
    let p = &event.participants;
    let number = event.fields.get("invoice_number").cloned();
    let due_date = event.fields.get("due_date").and_then(|d| parse_day(d));

    let Some(mut invoice) =
        existing(db.get_invoice(&event.reference_id))?.map(NewInvoice::from)
    else {
        let (Some(invoice_number), Some(agency_id), Some(client_id), Some(due_date)) =
            (number, p.agency.clone(), p.client.clone(), due_date)
        else {
            return Ok(None);
        };
        return Ok(Some(NewInvoice {
            id: event.reference_id.clone(),
            invoice_number,
            agency_id,
            client_id,
            due_date,
        }));
    };

    if let Some(number) = number {
        invoice.invoice_number = number;
    }
    if let Some(agency) = &p.agency {
        invoice.agency_id = agency.clone();
    }
    if let Some(client) = &p.client {
        invoice.client_id = client.clone();
    }
    if let Some(due_date) = due_date {
        invoice.due_date = due_date;
    }
    Ok(Some(invoice))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn event(value: serde_json::Value) -> DomainEvent {
        serde_json::from_value(value).unwrap()
    }

    fn task_create() -> DomainEvent {
        event(json!({
            "module": "task",
            "action": "create",
            "reference_id": "t1",
            "participants": {"assign_by": "alice", "assign_to": "bob", "watchers": ["carol"]},
            "fields": {"title": "Logo refresh", "due_date": "2024-05-01"},
        }))
    }

    #[test]
    fn test_task_events_maintain_the_row() {
        let db = db();
        assert!(project_event(&db, &task_create()).unwrap());
        let task = db.get_task("t1").unwrap();
        assert_eq!(task.assign_to, UserId::from("bob"));
        assert_eq!(task.watchers, vec![UserId::from("carol")]);
        assert_eq!(task.due_date, day("2024-05-01"));

        // Partial update keeps what it does not mention.
        let update = event(json!({
            "module": "task",
            "action": "update",
            "reference_id": "t1",
            "fields": {"due_date": "2024-06-01T10:00:00Z"},
        }));
        assert!(project_event(&db, &update).unwrap());
        let task = db.get_task("t1").unwrap();
        assert_eq!(task.due_date, day("2024-06-01"));
        assert_eq!(task.title, "Logo refresh");

        let done = event(json!({
            "module": "task",
            "action": "status_update",
            "reference_id": "t1",
            "fields": {"status": "completed"},
        }));
        assert!(project_event(&db, &done).unwrap());
        assert!(db.overdue_task_candidates(day("2030-01-01")).unwrap().is_empty());

        let mut delete = task_create();
        delete.action = Action::Delete;
        assert!(project_event(&db, &delete).unwrap());
        assert!(matches!(db.get_task("t1"), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_sparse_create_is_not_stored() {
        let db = db();
        let mut sparse = task_create();
        sparse.fields.remove("due_date");
        assert!(!project_event(&db, &sparse).unwrap());
        assert!(matches!(db.get_task("t1"), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_invoice_events_maintain_the_row() {
        let db = db();
        let create = event(json!({
            "module": "invoice",
            "action": "create",
            "reference_id": "inv-1",
            "participants": {"agency": "agency", "client": "carol"},
            "fields": {"invoice_number": "INV-7", "due_date": "2024-01-31", "status": "draft"},
        }));
        assert!(project_event(&db, &create).unwrap());
        assert_eq!(db.get_invoice("inv-1").unwrap().status, "draft");

        let sent = event(json!({
            "module": "invoice",
            "action": "status_update",
            "reference_id": "inv-1",
            "fields": {"status": "unpaid"},
        }));
        assert!(project_event(&db, &sent).unwrap());
        assert_eq!(db.overdue_invoice_candidates(day("2024-02-01")).unwrap().len(), 1);
    }

    #[test]
    fn test_other_modules_are_ignored() {
        let db = db();
        let general = event(json!({
            "module": "general",
            "action": "create",
            "reference_id": "n1",
            "fields": {"message": "hi", "due_date": "2024-01-01"},
        }));
        assert!(!project_event(&db, &general).unwrap());
    }

    #[test]
    fn test_entity_snapshots() {
        let mut db = db();
        let user: EntitySync = serde_json::from_value(json!({
            "kind": "user",
            "data": {
                "id": "dana",
                "first_name": "Dana",
                "email": "dana@example.com",
                "trial_ends_at": "2024-01-01T00:00:00Z",
            },
        }))
        .unwrap();
        assert!(apply(&mut db, &user).unwrap());
        let dana = db.get_user(&"dana".into()).unwrap();
        assert_eq!(dana.subscription_status, "trial");
        assert_eq!(dana.email.as_deref(), Some("dana@example.com"));

        let group: EntitySync = serde_json::from_value(json!({
            "kind": "group",
            "data": {"id": "g1", "name": "Launch", "created_by": "dana", "members": ["erin"]},
        }))
        .unwrap();
        assert!(apply(&mut db, &group).unwrap());
        assert_eq!(db.group_members(&"g1".into()).unwrap().len(), 2);

        let removed: EntitySync = serde_json::from_value(json!({
            "kind": "removed",
            "data": {"entity": "group", "id": "g1"},
        }))
        .unwrap();
        assert!(apply(&mut db, &removed).unwrap());
        assert!(!apply(&mut db, &removed).unwrap());
    }
}
