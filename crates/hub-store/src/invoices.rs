use chrono::{NaiveDate, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use hub_shared::UserId;

use crate::database::{date_col, date_to_sql, not_found, ts_col, ts_to_sql, Database};
use crate::error::Result;
use crate::models::Invoice;

const SELECT_COLUMNS: &str = "SELECT id, invoice_number, agency_id, client_id, due_date, status, created_at
     FROM invoices";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoice {
    pub id: String,
    pub invoice_number: String,
    pub agency_id: UserId,
    pub client_id: UserId,
    pub due_date: NaiveDate,
}

impl From<Invoice> for NewInvoice {
    fn from(invoice: Invoice) -> Self {
        Self {
            id: invoice.id,
            invoice_number: invoice.invoice_number,
            agency_id: invoice.agency_id,
            client_id: invoice.client_id,
            due_date: invoice.due_date,
        }
    }
}

impl Database {
    /// Insert an invoice or refresh it. Status is owned by
    /// [`set_invoice_status`](Self::set_invoice_status) and the overdue sweep,
    /// except that a new due date lifts an overdue flag.
    pub fn upsert_invoice(&self, new: &NewInvoice) -> Result<Invoice> {
        self.conn().execute(
            "INSERT INTO invoices (id, invoice_number, agency_id, client_id, due_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                invoice_number = excluded.invoice_number,
                agency_id = excluded.agency_id,
                client_id = excluded.client_id,
                due_date = excluded.due_date,
                status = CASE
                    WHEN status = 'overdue' AND due_date <> excluded.due_date THEN 'unpaid'
                    ELSE status END",
            params![
                new.id,
                new.invoice_number,
                new.agency_id.as_str(),
                new.client_id.as_str(),
                date_to_sql(&new.due_date),
                ts_to_sql(&Utc::now()),
            ],
        )?;
        self.get_invoice(&new.id)
    }

    pub fn get_invoice(&self, id: &str) -> Result<Invoice> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                row_to_invoice,
            )
            .map_err(not_found)
    }

    pub fn set_invoice_status(&self, id: &str, status: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE invoices SET status = ?1 WHERE id = ?2",
            params![status, id],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_invoice(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM invoices WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    /// Sent invoices past their due date that are neither paid nor flagged.
    pub fn overdue_invoice_candidates(&self, today: NaiveDate) -> Result<Vec<Invoice>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE due_date < ?1 AND status NOT IN ('draft', 'paid', 'overdue')
             ORDER BY due_date ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![date_to_sql(&today)], row_to_invoice)?;

        let mut invoices = Vec::new();
        for row in rows {
            invoices.push(row?);
        }
        Ok(invoices)
    }

    pub fn flag_invoice_overdue(&self, id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE invoices SET status = 'overdue'
             WHERE id = ?1 AND status NOT IN ('draft', 'paid', 'overdue')",
            params![id],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_invoice(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        id: row.get(0)?,
        invoice_number: row.get(1)?,
        agency_id: UserId(row.get(2)?),
        client_id: UserId(row.get(3)?),
        due_date: date_col(row, 4)?,
        status: row.get(5)?,
        created_at: ts_col(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn invoice(id: &str, due: &str) -> NewInvoice {
        NewInvoice {
            id: id.into(),
            invoice_number: format!("INV-{id}"),
            agency_id: "agency".into(),
            client_id: "carol".into(),
            due_date: day(due),
        }
    }

    #[test]
    fn test_overdue_candidates_skip_paid_and_draft() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_invoice(&invoice("1", "2024-01-01")).unwrap();
        db.upsert_invoice(&invoice("2", "2024-01-01")).unwrap();
        db.upsert_invoice(&invoice("3", "2024-01-01")).unwrap();
        db.upsert_invoice(&invoice("4", "2024-12-01")).unwrap();
        db.set_invoice_status("2", "paid").unwrap();
        db.set_invoice_status("3", "draft").unwrap();

        let due = db.overdue_invoice_candidates(day("2024-02-01")).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "1");
    }

    #[test]
    fn test_flag_overdue_once() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_invoice(&invoice("1", "2024-01-01")).unwrap();
        assert!(db.flag_invoice_overdue("1").unwrap());
        assert!(!db.flag_invoice_overdue("1").unwrap());
        assert_eq!(db.get_invoice("1").unwrap().status, "overdue");
    }

    #[test]
    fn test_upsert_keeps_status_until_rescheduled() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_invoice(&invoice("1", "2024-01-01")).unwrap();
        db.flag_invoice_overdue("1").unwrap();

        let same = db.upsert_invoice(&invoice("1", "2024-01-01")).unwrap();
        assert_eq!(same.status, "overdue");

        let moved = db.upsert_invoice(&invoice("1", "2024-03-01")).unwrap();
        assert_eq!(moved.status, "unpaid");
        assert!(db.delete_invoice("1").unwrap());
        assert!(db.overdue_invoice_candidates(day("2025-01-01")).unwrap().is_empty());
    }
}
