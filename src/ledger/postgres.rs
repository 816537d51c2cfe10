//! PostgreSQL ledger.
//!
//! The production backend. Conditional writes are plain `UPDATE ... WHERE
//! status = $expected` statements: the row either moves or it doesn't, and a
//! zero-row result is resolved into "not found" versus "precondition failed"
//! by a follow-up existence check inside the same transaction. All effects
//! of a transition (status, expert assignment, invite resolution, invoice
//! insert) share one transaction, so they land together or not at all.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::{
    Invoice, InvoiceId, InvoiceStatus, InviteStatus, NewRequest, Offering, PoolInvite, Request,
    RequestId, RequestStatus, User, UserId,
};
use crate::error::{Result, TadqiqError};

use super::{
    InvoiceFilter, InviteResolution, Ledger, RequestFilter, TransitionEffects,
};

/// Ledger backed by PostgreSQL.
///
/// Construct with an explicitly opened pool and pass the handle around; the
/// pool closes when the owning process shuts it down.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode_request(row: &PgRow) -> Result<Request> {
    let status_str: String = row.try_get("status").map_err(|e| anyhow!(e))?;
    let status = RequestStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("unknown request status in ledger: {status_str}"))?;
    let offering_json: serde_json::Value = row.try_get("offering").map_err(|e| anyhow!(e))?;
    let offering: Offering = serde_json::from_value(offering_json)?;
    Ok(Request {
        id: RequestId(row.try_get::<Uuid, _>("id").map_err(|e| anyhow!(e))?),
        display_id: row.try_get("display_id").map_err(|e| anyhow!(e))?,
        client_id: UserId(row.try_get::<Uuid, _>("client_id").map_err(|e| anyhow!(e))?),
        expert_id: row
            .try_get::<Option<Uuid>, _>("expert_id")
            .map_err(|e| anyhow!(e))?
            .map(UserId),
        offering,
        base_amount: row.try_get("base_amount").map_err(|e| anyhow!(e))?,
        currency: row.try_get("currency").map_err(|e| anyhow!(e))?,
        status,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| anyhow!(e))?,
        last_transition_at: row
            .try_get::<DateTime<Utc>, _>("last_transition_at")
            .map_err(|e| anyhow!(e))?,
    })
}

fn decode_invite(row: &PgRow) -> Result<PoolInvite> {
    let status_str: String = row.try_get("status").map_err(|e| anyhow!(e))?;
    let status = InviteStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("unknown invite status in ledger: {status_str}"))?;
    Ok(PoolInvite {
        request_id: RequestId(row.try_get::<Uuid, _>("request_id").map_err(|e| anyhow!(e))?),
        expert_id: UserId(row.try_get::<Uuid, _>("expert_id").map_err(|e| anyhow!(e))?),
        status,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| anyhow!(e))?,
    })
}

fn decode_invoice(row: &PgRow) -> Result<Invoice> {
    let status_str: String = row.try_get("status").map_err(|e| anyhow!(e))?;
    let status = InvoiceStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("unknown invoice status in ledger: {status_str}"))?;
    Ok(Invoice {
        id: InvoiceId(row.try_get::<Uuid, _>("id").map_err(|e| anyhow!(e))?),
        display_id: row.try_get("display_id").map_err(|e| anyhow!(e))?,
        request_id: RequestId(row.try_get::<Uuid, _>("request_id").map_err(|e| anyhow!(e))?),
        client_id: UserId(row.try_get::<Uuid, _>("client_id").map_err(|e| anyhow!(e))?),
        amount: row.try_get("amount").map_err(|e| anyhow!(e))?,
        currency: row.try_get("currency").map_err(|e| anyhow!(e))?,
        status,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| anyhow!(e))?,
    })
}

#[async_trait]
impl Ledger for PostgresLedger {
    async fn create_user(&self, user: User) -> Result<()> {
        let profile = serde_json::to_value(&user.profile)?;
        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, profile)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET display_name = EXCLUDED.display_name, profile = EXCLUDED.profile
            "#,
        )
        .bind(*user.id)
        .bind(&user.display_name)
        .bind(profile)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("failed to create user: {e}"))?;
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<User> {
        let row = sqlx::query("SELECT id, display_name, profile FROM users WHERE id = $1")
            .bind(*id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!("failed to fetch user: {e}"))?
            .ok_or(TadqiqError::UserNotFound(id))?;

        let profile: serde_json::Value = row.try_get("profile").map_err(|e| anyhow!(e))?;
        Ok(User {
            id: UserId(row.try_get::<Uuid, _>("id").map_err(|e| anyhow!(e))?),
            display_name: row.try_get("display_name").map_err(|e| anyhow!(e))?,
            profile: serde_json::from_value(profile)?,
        })
    }

    async fn create_request(&self, new: NewRequest, status: RequestStatus) -> Result<Request> {
        let currency = new
            .currency
            .ok_or_else(|| TadqiqError::Validation("currency must be set".into()))?;
        let offering = serde_json::to_value(&new.offering)?;

        let row = sqlx::query(
            r#"
            INSERT INTO requests
                (id, display_id, client_id, offering, base_amount, currency, status)
            VALUES
                ($1, 'REQ-' || lpad(nextval('request_display_seq')::text, 6, '0'),
                 $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(*new.client_id)
        .bind(offering)
        .bind(new.base_amount)
        .bind(&currency)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!("failed to create request: {e}"))?;

        decode_request(&row)
    }

    async fn get_request(&self, id: RequestId) -> Result<Request> {
        let row = sqlx::query("SELECT * FROM requests WHERE id = $1")
            .bind(*id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!("failed to fetch request: {e}"))?
            .ok_or(TadqiqError::RequestNotFound(id))?;
        decode_request(&row)
    }

    async fn query_requests(&self, filter: RequestFilter) -> Result<Vec<Request>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM requests
            WHERE ($1::uuid IS NULL OR client_id = $1)
              AND ($2::uuid IS NULL OR expert_id = $2)
              AND ($3::text IS NULL OR status = $3)
            ORDER BY created_at DESC
            "#,
        )
        .bind(filter.client_id.map(|c| *c))
        .bind(filter.expert_id.map(|e| *e))
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!("failed to query requests: {e}"))?;

        rows.iter().map(decode_request).collect()
    }

    async fn commit_transition(
        &self,
        id: RequestId,
        expected: RequestStatus,
        effects: TransitionEffects,
    ) -> Result<Request> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| anyhow!("failed to open transaction: {e}"))?;

        // The conditional write. Zero rows means the precondition did not
        // hold (or the request is unknown - resolved below).
        let updated = sqlx::query(
            r#"
            UPDATE requests SET
                status = $2,
                expert_id = CASE WHEN $3 THEN COALESCE($4, expert_id) ELSE NULL END,
                last_transition_at = now()
            WHERE id = $1 AND status = $5
            RETURNING *
            "#,
        )
        .bind(*id)
        .bind(effects.new_status.as_str())
        .bind(effects.new_status.requires_expert())
        .bind(effects.assign_expert.map(|e| *e))
        .bind(expected.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| anyhow!("failed to update request: {e}"))?;

        let Some(updated) = updated else {
            let exists = sqlx::query("SELECT 1 FROM requests WHERE id = $1")
                .bind(*id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| anyhow!("failed to check request existence: {e}"))?;
            return Err(if exists.is_some() {
                TadqiqError::PreconditionFailed(id)
            } else {
                TadqiqError::RequestNotFound(id)
            });
        };
        let updated = decode_request(&updated)?;

        match &effects.resolve_invites {
            Some(InviteResolution::AcceptFor(winner)) => {
                sqlx::query(
                    r#"
                    UPDATE pool_invites
                    SET status = CASE WHEN expert_id = $2 THEN 'accepted' ELSE 'expired' END
                    WHERE request_id = $1 AND status = 'invited'
                    "#,
                )
                .bind(*id)
                .bind(**winner)
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow!("failed to resolve invites: {e}"))?;
            }
            Some(InviteResolution::ExpireAll) => {
                sqlx::query(
                    "UPDATE pool_invites SET status = 'expired' WHERE request_id = $1 AND status = 'invited'",
                )
                .bind(*id)
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow!("failed to expire invites: {e}"))?;
            }
            None => {}
        }

        if let Some(draft) = &effects.issue_invoice {
            // ON CONFLICT upholds the single-invoice policy under the unique
            // request_id constraint.
            sqlx::query(
                r#"
                INSERT INTO invoices
                    (id, display_id, request_id, client_id, amount, currency)
                VALUES
                    ($1, 'INV-' || lpad(nextval('invoice_display_seq')::text, 6, '0'),
                     $2, $3, $4, $5)
                ON CONFLICT (request_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(*id)
            .bind(*updated.client_id)
            .bind(draft.amount)
            .bind(&updated.currency)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!("failed to issue invoice: {e}"))?;
        }

        tx.commit()
            .await
            .map_err(|e| anyhow!("failed to commit transition: {e}"))?;

        Ok(updated)
    }

    async fn create_invite(&self, request_id: RequestId, expert_id: UserId) -> Result<PoolInvite> {
        let row = sqlx::query(
            r#"
            INSERT INTO pool_invites (request_id, expert_id)
            VALUES ($1, $2)
            ON CONFLICT (request_id, expert_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(*request_id)
        .bind(*expert_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!("failed to create invite: {e}"))?
        .ok_or_else(|| {
            TadqiqError::Validation(format!(
                "expert {expert_id} is already invited to request {request_id}"
            ))
        })?;
        decode_invite(&row)
    }

    async fn invites_for_request(&self, request_id: RequestId) -> Result<Vec<PoolInvite>> {
        let rows = sqlx::query("SELECT * FROM pool_invites WHERE request_id = $1")
            .bind(*request_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!("failed to fetch invites: {e}"))?;
        rows.iter().map(decode_invite).collect()
    }

    async fn invites_for_expert(&self, expert_id: UserId) -> Result<Vec<PoolInvite>> {
        let rows = sqlx::query("SELECT * FROM pool_invites WHERE expert_id = $1")
            .bind(*expert_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!("failed to fetch invites: {e}"))?;
        rows.iter().map(decode_invite).collect()
    }

    async fn set_invite_status(
        &self,
        request_id: RequestId,
        expert_id: UserId,
        expected: InviteStatus,
        to: InviteStatus,
    ) -> Result<PoolInvite> {
        let row = sqlx::query(
            r#"
            UPDATE pool_invites SET status = $4
            WHERE request_id = $1 AND expert_id = $2 AND status = $3
            RETURNING *
            "#,
        )
        .bind(*request_id)
        .bind(*expert_id)
        .bind(expected.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!("failed to update invite: {e}"))?;

        match row {
            Some(row) => decode_invite(&row),
            None => {
                let exists =
                    sqlx::query("SELECT 1 FROM pool_invites WHERE request_id = $1 AND expert_id = $2")
                        .bind(*request_id)
                        .bind(*expert_id)
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(|e| anyhow!("failed to check invite existence: {e}"))?;
                Err(if exists.is_some() {
                    TadqiqError::PreconditionFailed(request_id)
                } else {
                    TadqiqError::InviteNotFound {
                        request: request_id,
                        expert: expert_id,
                    }
                })
            }
        }
    }

    async fn get_invoice(&self, id: InvoiceId) -> Result<Invoice> {
        let row = sqlx::query("SELECT * FROM invoices WHERE id = $1")
            .bind(*id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!("failed to fetch invoice: {e}"))?
            .ok_or(TadqiqError::InvoiceNotFound(id))?;
        decode_invoice(&row)
    }

    async fn query_invoices(&self, filter: InvoiceFilter) -> Result<Vec<Invoice>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM invoices
            WHERE ($1::uuid IS NULL OR client_id = $1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(filter.client_id.map(|c| *c))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!("failed to query invoices: {e}"))?;
        rows.iter().map(decode_invoice).collect()
    }

    async fn set_invoice_status(
        &self,
        id: InvoiceId,
        expected: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<Invoice> {
        let row = sqlx::query(
            r#"
            UPDATE invoices SET status = $3
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(*id)
        .bind(expected.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!("failed to update invoice: {e}"))?;

        match row {
            Some(row) => decode_invoice(&row),
            None => {
                let current = sqlx::query("SELECT status FROM invoices WHERE id = $1")
                    .bind(*id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| anyhow!("failed to check invoice existence: {e}"))?;
                match current {
                    None => Err(TadqiqError::InvoiceNotFound(id)),
                    Some(row) => {
                        let status_str: String =
                            row.try_get("status").map_err(|e| anyhow!(e))?;
                        let from = InvoiceStatus::parse(&status_str)
                            .ok_or_else(|| anyhow!("unknown invoice status: {status_str}"))?;
                        Err(TadqiqError::InvalidInvoiceTransition {
                            invoice: id,
                            from,
                            edge: match to {
                                InvoiceStatus::Paid => "mark paid",
                                InvoiceStatus::Void => "void",
                                InvoiceStatus::Issued => "reissue",
                            },
                        })
                    }
                }
            }
        }
    }
}
