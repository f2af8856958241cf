//! rusqlite-backed store. One connection behind an async mutex; every
//! trait method holds the lock for its whole body, which is what makes
//! each call atomic with respect to concurrent callers.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, Row, params};
use tokio::sync::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::model::{
    Agent, AgentPatch, AgentStatus, BatchStatus, Customer, CustomerPatch, Match, MatchStatus,
    QueueItem, QueueKind, QueueStatus, SettlementBatch, SettlementEntry, Wager, WagerStatus,
};
use crate::normalize::PERMISSION_COLUMNS;

use super::{
    AgentFilter, AuditEntry, BatchTotals, CustomerFilter, MatchFilter, QueueFilter,
    SettlementFilter, Store, WagerFilter,
};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("creating db directory")?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening sqlite at {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        migrate(&conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private on-disk-free store, used by tests and `check-upstream`.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory sqlite")?;
        migrate(&conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS agents (
            id                  TEXT PRIMARY KEY,
            display_name        TEXT NOT NULL,
            parent_id           TEXT,
            status              TEXT NOT NULL,
            can_place_bet       INTEGER NOT NULL DEFAULT 0,
            rate_internet       REAL NOT NULL DEFAULT 0,
            rate_casino         REAL NOT NULL DEFAULT 0,
            rate_sports         REAL NOT NULL DEFAULT 0,
            rate_prop           REAL NOT NULL DEFAULT 0,
            rate_live_casino    REAL NOT NULL DEFAULT 0,
            credit_limit        REAL NOT NULL DEFAULT 0,
            outstanding_credit  REAL NOT NULL DEFAULT 0,
            allow_add_customer  INTEGER NOT NULL DEFAULT 0,
            allow_delete_bets   INTEGER NOT NULL DEFAULT 0,
            allow_settle        INTEGER NOT NULL DEFAULT 0,
            allow_payments      INTEGER NOT NULL DEFAULT 0,
            allow_live_betting  INTEGER NOT NULL DEFAULT 0,
            allow_casino        INTEGER NOT NULL DEFAULT 0,
            allow_prop_builder  INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS customers (
            id                    TEXT PRIMARY KEY,
            agent_id              TEXT NOT NULL,
            login                 TEXT NOT NULL,
            display_name          TEXT NOT NULL DEFAULT '',
            phone                 TEXT,
            email                 TEXT,
            balance               REAL NOT NULL DEFAULT 0,
            pending_balance       REAL NOT NULL DEFAULT 0,
            daily_pnl             TEXT NOT NULL DEFAULT '[0,0,0,0,0,0,0]',
            last_ticket_at        INTEGER,
            last_verified_at      INTEGER,
            suspect_bot           INTEGER NOT NULL DEFAULT 0,
            zero_balance          INTEGER NOT NULL DEFAULT 0,
            active                INTEGER NOT NULL DEFAULT 1,
            sportsbook_suspended  INTEGER NOT NULL DEFAULT 0,
            casino_suspended      INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_customers_agent ON customers(agent_id);

        CREATE TABLE IF NOT EXISTS wagers (
            wager_number       INTEGER PRIMARY KEY,
            customer_id        TEXT NOT NULL,
            agent_id           TEXT NOT NULL DEFAULT '',
            amount_wagered     REAL NOT NULL,
            to_win             REAL NOT NULL DEFAULT 0,
            description        TEXT NOT NULL DEFAULT '',
            placed_at          INTEGER NOT NULL DEFAULT 0,
            settlement_status  TEXT NOT NULL DEFAULT 'pending',
            settlement_amount  REAL,
            settled_at         INTEGER,
            settled_by         TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_wagers_customer
            ON wagers(customer_id, settlement_status);

        CREATE TABLE IF NOT EXISTS settlement_log (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            wager_number       INTEGER NOT NULL,
            customer_id        TEXT NOT NULL,
            agent_id           TEXT NOT NULL DEFAULT '',
            settlement_type    TEXT NOT NULL,
            original_amount    REAL NOT NULL,
            settlement_amount  REAL NOT NULL,
            balance_before     REAL NOT NULL,
            balance_after      REAL NOT NULL,
            settled_by         TEXT NOT NULL,
            batch_id           TEXT,
            note               TEXT,
            created_at         INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_settlement_log_wager ON settlement_log(wager_number);
        CREATE INDEX IF NOT EXISTS idx_settlement_log_batch ON settlement_log(batch_id);
        CREATE INDEX IF NOT EXISTS idx_settlement_log_at ON settlement_log(created_at);

        CREATE TABLE IF NOT EXISTS settlement_batches (
            batch_id                 TEXT PRIMARY KEY,
            created_by               TEXT NOT NULL,
            created_at               INTEGER NOT NULL,
            total_count              INTEGER NOT NULL DEFAULT 0,
            completed_count          INTEGER NOT NULL DEFAULT 0,
            failed_count             INTEGER NOT NULL DEFAULT 0,
            total_settlement_amount  REAL NOT NULL DEFAULT 0,
            status                   TEXT NOT NULL DEFAULT 'open'
        );

        CREATE TABLE IF NOT EXISTS queue_items (
            id               TEXT PRIMARY KEY,
            kind             TEXT NOT NULL,
            customer_id      TEXT NOT NULL,
            amount           REAL NOT NULL,
            payment_method   TEXT NOT NULL,
            payment_details  TEXT NOT NULL DEFAULT '',
            priority         INTEGER NOT NULL DEFAULT 0,
            status           TEXT NOT NULL DEFAULT 'pending',
            created_at       INTEGER NOT NULL,
            matched_with     TEXT,
            notes            TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_queue_scan
            ON queue_items(kind, status, priority DESC, created_at ASC);

        CREATE TABLE IF NOT EXISTS matches (
            id             TEXT PRIMARY KEY,
            withdrawal_id  TEXT NOT NULL,
            deposit_id     TEXT NOT NULL,
            amount         REAL NOT NULL,
            score          INTEGER NOT NULL,
            status         TEXT NOT NULL DEFAULT 'pending',
            created_at     INTEGER NOT NULL,
            completed_at   INTEGER,
            note           TEXT
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_matches_live_withdrawal
            ON matches(withdrawal_id) WHERE status != 'failed';
        CREATE UNIQUE INDEX IF NOT EXISTS idx_matches_live_deposit
            ON matches(deposit_id) WHERE status != 'failed';

        CREATE TABLE IF NOT EXISTS audit_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            entity      TEXT NOT NULL,
            entity_id   TEXT NOT NULL,
            action      TEXT NOT NULL,
            actor       TEXT NOT NULL,
            detail      TEXT,
            created_at  INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_entity
            ON audit_log(entity, entity_id, created_at);
        ",
    )?;
    Ok(())
}

fn db_err(e: rusqlite::Error) -> CoreError {
    CoreError::internal(format!("sqlite: {e}"))
}

fn bad_row(what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("unrecognized {what}").into(),
    )
}

// ── Row mapping ─────────────────────────────────────────────────────

fn row_to_agent(row: &Row) -> rusqlite::Result<Agent> {
    let status: String = row.get("status")?;
    let mut permissions = std::collections::HashSet::new();
    for (i, (_, perm)) in PERMISSION_COLUMNS.iter().enumerate() {
        let allowed: bool = row.get(12 + i)?;
        if allowed {
            permissions.insert(perm.to_string());
        }
    }
    Ok(Agent {
        id: row.get("id")?,
        display_name: row.get("display_name")?,
        parent_id: row.get("parent_id")?,
        status: AgentStatus::parse(&status).ok_or_else(|| bad_row("agent status"))?,
        can_place_bet: row.get("can_place_bet")?,
        rate_internet: row.get("rate_internet")?,
        rate_casino: row.get("rate_casino")?,
        rate_sports: row.get("rate_sports")?,
        rate_prop: row.get("rate_prop")?,
        rate_live_casino: row.get("rate_live_casino")?,
        credit_limit: row.get("credit_limit")?,
        outstanding_credit: row.get("outstanding_credit")?,
        permissions,
    })
}

const AGENT_COLS: &str = "id, display_name, parent_id, status, can_place_bet, \
    rate_internet, rate_casino, rate_sports, rate_prop, rate_live_casino, \
    credit_limit, outstanding_credit, \
    allow_add_customer, allow_delete_bets, allow_settle, allow_payments, \
    allow_live_betting, allow_casino, allow_prop_builder";

fn row_to_customer(row: &Row) -> rusqlite::Result<Customer> {
    let pnl_json: String = row.get("daily_pnl")?;
    let daily_pnl: [f64; 7] = serde_json::from_str(&pnl_json).unwrap_or([0.0; 7]);
    Ok(Customer {
        customer_id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        login: row.get("login")?,
        display_name: row.get("display_name")?,
        phone: row.get("phone")?,
        email: row.get("email")?,
        balance: row.get("balance")?,
        pending_balance: row.get("pending_balance")?,
        daily_pnl,
        last_ticket_at: row.get("last_ticket_at")?,
        last_verified_at: row.get("last_verified_at")?,
        suspect_bot: row.get("suspect_bot")?,
        zero_balance: row.get("zero_balance")?,
        active: row.get("active")?,
        sportsbook_suspended: row.get("sportsbook_suspended")?,
        casino_suspended: row.get("casino_suspended")?,
    })
}

fn row_to_wager(row: &Row) -> rusqlite::Result<Wager> {
    let status: String = row.get("settlement_status")?;
    Ok(Wager {
        wager_number: row.get("wager_number")?,
        customer_id: row.get("customer_id")?,
        agent_id: row.get("agent_id")?,
        amount_wagered: row.get("amount_wagered")?,
        to_win: row.get("to_win")?,
        description: row.get("description")?,
        placed_at: row.get("placed_at")?,
        settlement_status: WagerStatus::parse(&status).ok_or_else(|| bad_row("wager status"))?,
        settlement_amount: row.get("settlement_amount")?,
        settled_at: row.get("settled_at")?,
        settled_by: row.get("settled_by")?,
    })
}

fn row_to_settlement(row: &Row) -> rusqlite::Result<SettlementEntry> {
    Ok(SettlementEntry {
        wager_number: row.get("wager_number")?,
        customer_id: row.get("customer_id")?,
        agent_id: row.get("agent_id")?,
        settlement_type: row.get("settlement_type")?,
        original_amount: row.get("original_amount")?,
        settlement_amount: row.get("settlement_amount")?,
        balance_before: row.get("balance_before")?,
        balance_after: row.get("balance_after")?,
        settled_by: row.get("settled_by")?,
        batch_id: row.get("batch_id")?,
        note: row.get("note")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_queue_item(row: &Row) -> rusqlite::Result<QueueItem> {
    let kind: String = row.get("kind")?;
    let status: String = row.get("status")?;
    Ok(QueueItem {
        id: row.get("id")?,
        kind: QueueKind::parse(&kind).ok_or_else(|| bad_row("queue kind"))?,
        customer_id: row.get("customer_id")?,
        amount: row.get("amount")?,
        payment_method: row.get("payment_method")?,
        payment_details: row.get("payment_details")?,
        priority: row.get("priority")?,
        status: QueueStatus::parse(&status).ok_or_else(|| bad_row("queue status"))?,
        created_at: row.get("created_at")?,
        matched_with: row.get("matched_with")?,
        notes: row.get("notes")?,
    })
}

fn row_to_match(row: &Row) -> rusqlite::Result<Match> {
    let status: String = row.get("status")?;
    Ok(Match {
        id: row.get("id")?,
        withdrawal_id: row.get("withdrawal_id")?,
        deposit_id: row.get("deposit_id")?,
        amount: row.get("amount")?,
        score: row.get("score")?,
        status: MatchStatus::parse(&status).ok_or_else(|| bad_row("match status"))?,
        created_at: row.get("created_at")?,
        completed_at: row.get("completed_at")?,
        note: row.get("note")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn ping(&self) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(db_err)
    }

    // ── Agents ──────────────────────────────────────────────────────

    async fn agents_list(&self, filter: &AgentFilter) -> CoreResult<Vec<Agent>> {
        let conn = self.conn.lock().await;
        let mut sql = format!("SELECT {AGENT_COLS} FROM agents WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(status.as_str().to_string()));
        }
        if let Some(search) = &filter.search {
            sql.push_str(" AND (id LIKE ? OR display_name LIKE ?)");
            let like = format!("%{search}%");
            args.push(Box::new(like.clone()));
            args.push(Box::new(like));
        }
        sql.push_str(" ORDER BY id");
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), row_to_agent)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    async fn agent_get(&self, id: &str) -> CoreResult<Option<Agent>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {AGENT_COLS} FROM agents WHERE id = ?");
        match conn.query_row(&sql, params![id], row_to_agent) {
            Ok(agent) => Ok(Some(agent)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn agent_upsert(&self, agent: &Agent) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let perms: Vec<bool> = PERMISSION_COLUMNS
            .iter()
            .map(|(_, perm)| agent.permissions.contains(*perm))
            .collect();
        conn.execute(
            "INSERT INTO agents (id, display_name, parent_id, status, can_place_bet,
                rate_internet, rate_casino, rate_sports, rate_prop, rate_live_casino,
                credit_limit, outstanding_credit,
                allow_add_customer, allow_delete_bets, allow_settle, allow_payments,
                allow_live_betting, allow_casino, allow_prop_builder)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                     ?13, ?14, ?15, ?16, ?17, ?18, ?19)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                parent_id = excluded.parent_id,
                status = excluded.status,
                can_place_bet = excluded.can_place_bet,
                rate_internet = excluded.rate_internet,
                rate_casino = excluded.rate_casino,
                rate_sports = excluded.rate_sports,
                rate_prop = excluded.rate_prop,
                rate_live_casino = excluded.rate_live_casino,
                credit_limit = excluded.credit_limit,
                outstanding_credit = excluded.outstanding_credit,
                allow_add_customer = excluded.allow_add_customer,
                allow_delete_bets = excluded.allow_delete_bets,
                allow_settle = excluded.allow_settle,
                allow_payments = excluded.allow_payments,
                allow_live_betting = excluded.allow_live_betting,
                allow_casino = excluded.allow_casino,
                allow_prop_builder = excluded.allow_prop_builder",
            params![
                agent.id,
                agent.display_name,
                agent.parent_id,
                agent.status.as_str(),
                agent.can_place_bet,
                agent.rate_internet,
                agent.rate_casino,
                agent.rate_sports,
                agent.rate_prop,
                agent.rate_live_casino,
                agent.credit_limit,
                agent.outstanding_credit,
                perms[0],
                perms[1],
                perms[2],
                perms[3],
                perms[4],
                perms[5],
                perms[6],
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn agent_update(&self, id: &str, patch: &AgentPatch) -> CoreResult<Agent> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {AGENT_COLS} FROM agents WHERE id = ?");
        let mut agent = match conn.query_row(&sql, params![id], row_to_agent) {
            Ok(a) => a,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(CoreError::NotFound(format!("agent '{id}'")));
            }
            Err(e) => return Err(db_err(e)),
        };

        if let Some(name) = &patch.display_name {
            agent.display_name = name.clone();
        }
        if let Some(status) = patch.status {
            agent.status = status;
        }
        if let Some(can) = patch.can_place_bet {
            agent.can_place_bet = can;
        }
        if let Some(limit) = patch.credit_limit {
            agent.credit_limit = limit;
        }
        if let Some(perms) = &patch.permissions {
            agent.permissions = perms.clone();
        }

        let perms: Vec<bool> = PERMISSION_COLUMNS
            .iter()
            .map(|(_, perm)| agent.permissions.contains(*perm))
            .collect();
        conn.execute(
            "UPDATE agents SET display_name = ?2, status = ?3, can_place_bet = ?4,
                credit_limit = ?5,
                allow_add_customer = ?6, allow_delete_bets = ?7, allow_settle = ?8,
                allow_payments = ?9, allow_live_betting = ?10, allow_casino = ?11,
                allow_prop_builder = ?12
             WHERE id = ?1",
            params![
                id,
                agent.display_name,
                agent.status.as_str(),
                agent.can_place_bet,
                agent.credit_limit,
                perms[0],
                perms[1],
                perms[2],
                perms[3],
                perms[4],
                perms[5],
                perms[6],
            ],
        )
        .map_err(db_err)?;
        Ok(agent)
    }

    // ── Customers ───────────────────────────────────────────────────

    async fn customers_list(&self, filter: &CustomerFilter) -> CoreResult<Vec<Customer>> {
        let conn = self.conn.lock().await;
        let mut sql = "SELECT * FROM customers WHERE 1=1".to_string();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(agent) = &filter.agent {
            sql.push_str(" AND agent_id = ?");
            args.push(Box::new(agent.clone()));
        }
        if let Some(active) = filter.active {
            sql.push_str(" AND active = ?");
            args.push(Box::new(active));
        }
        if let Some(search) = &filter.search {
            sql.push_str(" AND (id LIKE ? OR login LIKE ? OR display_name LIKE ?)");
            let like = format!("%{search}%");
            args.push(Box::new(like.clone()));
            args.push(Box::new(like.clone()));
            args.push(Box::new(like));
        }
        sql.push_str(" ORDER BY id LIMIT ? OFFSET ?");
        args.push(Box::new(filter.limit.unwrap_or(500) as i64));
        args.push(Box::new(filter.offset.unwrap_or(0) as i64));

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), row_to_customer)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    async fn customer_get(&self, id: &str) -> CoreResult<Option<Customer>> {
        let conn = self.conn.lock().await;
        match conn.query_row(
            "SELECT * FROM customers WHERE id = ?",
            params![id],
            row_to_customer,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn customer_upsert(&self, customer: &Customer) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let pnl = serde_json::to_string(&customer.daily_pnl).unwrap_or_default();
        conn.execute(
            "INSERT INTO customers (id, agent_id, login, display_name, phone, email,
                balance, pending_balance, daily_pnl, last_ticket_at, last_verified_at,
                suspect_bot, zero_balance, active, sportsbook_suspended, casino_suspended)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(id) DO UPDATE SET
                agent_id = excluded.agent_id,
                login = excluded.login,
                display_name = excluded.display_name,
                phone = excluded.phone,
                email = excluded.email,
                balance = excluded.balance,
                pending_balance = excluded.pending_balance,
                daily_pnl = excluded.daily_pnl,
                last_ticket_at = excluded.last_ticket_at,
                last_verified_at = excluded.last_verified_at,
                suspect_bot = excluded.suspect_bot,
                zero_balance = excluded.zero_balance,
                active = excluded.active,
                sportsbook_suspended = excluded.sportsbook_suspended,
                casino_suspended = excluded.casino_suspended",
            params![
                customer.customer_id,
                customer.agent_id,
                customer.login,
                customer.display_name,
                customer.phone,
                customer.email,
                customer.balance,
                customer.pending_balance,
                pnl,
                customer.last_ticket_at,
                customer.last_verified_at,
                customer.suspect_bot,
                customer.zero_balance,
                customer.active,
                customer.sportsbook_suspended,
                customer.casino_suspended,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn customer_update(&self, id: &str, patch: &CustomerPatch) -> CoreResult<Customer> {
        let conn = self.conn.lock().await;
        let mut customer = match conn.query_row(
            "SELECT * FROM customers WHERE id = ?",
            params![id],
            row_to_customer,
        ) {
            Ok(c) => c,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(CoreError::NotFound(format!("customer '{id}'")));
            }
            Err(e) => return Err(db_err(e)),
        };

        if let Some(name) = &patch.display_name {
            customer.display_name = name.clone();
        }
        if let Some(phone) = &patch.phone {
            customer.phone = Some(phone.clone());
        }
        if let Some(email) = &patch.email {
            customer.email = Some(email.clone());
        }
        if let Some(active) = patch.active {
            customer.active = active;
        }
        if let Some(v) = patch.sportsbook_suspended {
            customer.sportsbook_suspended = v;
        }
        if let Some(v) = patch.casino_suspended {
            customer.casino_suspended = v;
        }

        conn.execute(
            "UPDATE customers SET display_name = ?2, phone = ?3, email = ?4,
                active = ?5, sportsbook_suspended = ?6, casino_suspended = ?7
             WHERE id = ?1",
            params![
                id,
                customer.display_name,
                customer.phone,
                customer.email,
                customer.active,
                customer.sportsbook_suspended,
                customer.casino_suspended,
            ],
        )
        .map_err(db_err)?;
        Ok(customer)
    }

    async fn customer_credit(&self, id: &str, amount: f64) -> CoreResult<(f64, f64)> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        let before: f64 = match tx.query_row(
            "SELECT balance FROM customers WHERE id = ?",
            params![id],
            |row| row.get(0),
        ) {
            Ok(b) => b,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(CoreError::NotFound(format!("customer '{id}'")));
            }
            Err(e) => return Err(db_err(e)),
        };
        let after = before + amount;
        tx.execute(
            "UPDATE customers SET balance = ?2, zero_balance = (?2 = 0) WHERE id = ?1",
            params![id, after],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok((before, after))
    }

    async fn customer_reserve(&self, id: &str, delta: f64) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE customers SET pending_balance = MAX(0, pending_balance + ?2)
                 WHERE id = ?1",
                params![id, delta],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(CoreError::NotFound(format!("customer '{id}'")));
        }
        Ok(())
    }

    // ── Wagers ──────────────────────────────────────────────────────

    async fn wagers_list(&self, filter: &WagerFilter) -> CoreResult<Vec<Wager>> {
        let conn = self.conn.lock().await;
        let mut sql = "SELECT * FROM wagers WHERE 1=1".to_string();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(agent) = &filter.agent {
            sql.push_str(" AND agent_id = ?");
            args.push(Box::new(agent.clone()));
        }
        if let Some(customer) = &filter.customer {
            sql.push_str(" AND customer_id = ?");
            args.push(Box::new(customer.clone()));
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND settlement_status = ?");
            args.push(Box::new(status.as_str().to_string()));
        }
        sql.push_str(" ORDER BY wager_number LIMIT ? OFFSET ?");
        args.push(Box::new(filter.limit.unwrap_or(500) as i64));
        args.push(Box::new(filter.offset.unwrap_or(0) as i64));

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), row_to_wager)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    async fn wager_get(&self, wager_number: i64) -> CoreResult<Option<Wager>> {
        let conn = self.conn.lock().await;
        match conn.query_row(
            "SELECT * FROM wagers WHERE wager_number = ?",
            params![wager_number],
            row_to_wager,
        ) {
            Ok(w) => Ok(Some(w)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn wager_upsert(&self, wager: &Wager) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO wagers (wager_number, customer_id, agent_id, amount_wagered,
                to_win, description, placed_at, settlement_status, settlement_amount,
                settled_at, settled_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(wager_number) DO UPDATE SET
                customer_id = excluded.customer_id,
                agent_id = excluded.agent_id,
                amount_wagered = excluded.amount_wagered,
                to_win = excluded.to_win,
                description = excluded.description,
                placed_at = excluded.placed_at
             WHERE wagers.settlement_status = 'pending'",
            params![
                wager.wager_number,
                wager.customer_id,
                wager.agent_id,
                wager.amount_wagered,
                wager.to_win,
                wager.description,
                wager.placed_at,
                wager.settlement_status.as_str(),
                wager.settlement_amount,
                wager.settled_at,
                wager.settled_by,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn wager_settle(
        &self,
        wager_number: i64,
        status: WagerStatus,
        settlement_amount: f64,
        settled_at: i64,
        settled_by: &str,
    ) -> CoreResult<bool> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE wagers SET settlement_status = ?2, settlement_amount = ?3,
                    settled_at = ?4, settled_by = ?5
                 WHERE wager_number = ?1 AND settlement_status = 'pending'",
                params![
                    wager_number,
                    status.as_str(),
                    settlement_amount,
                    settled_at,
                    settled_by
                ],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    // ── Settlement log & batches ────────────────────────────────────

    async fn settlements_append(&self, entry: &SettlementEntry) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO settlement_log (wager_number, customer_id, agent_id,
                settlement_type, original_amount, settlement_amount,
                balance_before, balance_after, settled_by, batch_id, note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.wager_number,
                entry.customer_id,
                entry.agent_id,
                entry.settlement_type,
                entry.original_amount,
                entry.settlement_amount,
                entry.balance_before,
                entry.balance_after,
                entry.settled_by,
                entry.batch_id,
                entry.note,
                entry.created_at,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn settlements_list(&self, filter: &SettlementFilter) -> CoreResult<Vec<SettlementEntry>> {
        let conn = self.conn.lock().await;
        let mut sql = "SELECT * FROM settlement_log WHERE 1=1".to_string();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(wager) = filter.wager_number {
            sql.push_str(" AND wager_number = ?");
            args.push(Box::new(wager));
        }
        if let Some(batch) = &filter.batch_id {
            sql.push_str(" AND batch_id = ?");
            args.push(Box::new(batch.clone()));
        }
        if let Some(customer) = &filter.customer {
            sql.push_str(" AND customer_id = ?");
            args.push(Box::new(customer.clone()));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");
        args.push(Box::new(filter.limit.unwrap_or(200) as i64));

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), row_to_settlement)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    async fn last_settlement_at(&self) -> CoreResult<Option<i64>> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT MAX(created_at) FROM settlement_log", [], |row| {
            row.get(0)
        })
        .map_err(db_err)
    }

    async fn settlement_batch_create(&self, batch: &SettlementBatch) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO settlement_batches (batch_id, created_by, created_at,
                total_count, completed_count, failed_count, total_settlement_amount, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                batch.batch_id,
                batch.created_by,
                batch.created_at,
                batch.total_count,
                batch.completed_count,
                batch.failed_count,
                batch.total_settlement_amount,
                batch.status.as_str(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn settlement_batch_get(&self, batch_id: &str) -> CoreResult<Option<SettlementBatch>> {
        let conn = self.conn.lock().await;
        match conn.query_row(
            "SELECT * FROM settlement_batches WHERE batch_id = ?",
            params![batch_id],
            |row| {
                let status: String = row.get("status")?;
                Ok(SettlementBatch {
                    batch_id: row.get("batch_id")?,
                    created_by: row.get("created_by")?,
                    created_at: row.get("created_at")?,
                    total_count: row.get("total_count")?,
                    completed_count: row.get("completed_count")?,
                    failed_count: row.get("failed_count")?,
                    total_settlement_amount: row.get("total_settlement_amount")?,
                    status: BatchStatus::parse(&status).ok_or_else(|| bad_row("batch status"))?,
                })
            },
        ) {
            Ok(b) => Ok(Some(b)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn settlement_batch_complete(
        &self,
        batch_id: &str,
        totals: &BatchTotals,
    ) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE settlement_batches SET completed_count = ?2, failed_count = ?3,
                    total_settlement_amount = ?4, status = ?5
                 WHERE batch_id = ?1",
                params![
                    batch_id,
                    totals.completed_count,
                    totals.failed_count,
                    totals.total_settlement_amount,
                    totals.status.as_str(),
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(CoreError::NotFound(format!("batch '{batch_id}'")));
        }
        Ok(())
    }

    // ── Queues & matches ────────────────────────────────────────────

    async fn queue_insert(&self, item: &QueueItem) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO queue_items (id, kind, customer_id, amount, payment_method,
                payment_details, priority, status, created_at, matched_with, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                item.id,
                item.kind.as_str(),
                item.customer_id,
                item.amount,
                item.payment_method,
                item.payment_details,
                item.priority,
                item.status.as_str(),
                item.created_at,
                item.matched_with,
                item.notes,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn queue_get(&self, id: &str) -> CoreResult<Option<QueueItem>> {
        let conn = self.conn.lock().await;
        match conn.query_row(
            "SELECT * FROM queue_items WHERE id = ?",
            params![id],
            row_to_queue_item,
        ) {
            Ok(item) => Ok(Some(item)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn queue_list(&self, filter: &QueueFilter) -> CoreResult<Vec<QueueItem>> {
        let conn = self.conn.lock().await;
        let mut sql = "SELECT * FROM queue_items WHERE 1=1".to_string();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(kind) = filter.kind {
            sql.push_str(" AND kind = ?");
            args.push(Box::new(kind.as_str().to_string()));
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(status.as_str().to_string()));
        }
        sql.push_str(" ORDER BY priority DESC, created_at ASC, id ASC LIMIT ?");
        args.push(Box::new(filter.limit.unwrap_or(1000) as i64));

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), row_to_queue_item)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    async fn queue_update_status(
        &self,
        id: &str,
        status: QueueStatus,
        matched_with: Option<&str>,
        notes: Option<&str>,
    ) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE queue_items SET status = ?2,
                    matched_with = COALESCE(?3, matched_with),
                    notes = COALESCE(?4, notes)
                 WHERE id = ?1",
                params![id, status.as_str(), matched_with, notes],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(CoreError::NotFound(format!("queue item '{id}'")));
        }
        Ok(())
    }

    async fn match_pair(&self, m: &Match) -> CoreResult<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;

        let w = tx
            .execute(
                "UPDATE queue_items SET status = 'matched', matched_with = ?2
                 WHERE id = ?1 AND status = 'pending' AND kind = 'withdrawal'",
                params![m.withdrawal_id, m.deposit_id],
            )
            .map_err(db_err)?;
        let d = tx
            .execute(
                "UPDATE queue_items SET status = 'matched', matched_with = ?2
                 WHERE id = ?1 AND status = 'pending' AND kind = 'deposit'",
                params![m.deposit_id, m.withdrawal_id],
            )
            .map_err(db_err)?;

        if w != 1 || d != 1 {
            // One of the items moved since the snapshot; nothing committed.
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO matches (id, withdrawal_id, deposit_id, amount, score,
                status, created_at, completed_at, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                m.id,
                m.withdrawal_id,
                m.deposit_id,
                m.amount,
                m.score,
                m.status.as_str(),
                m.created_at,
                m.completed_at,
                m.note,
            ],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        Ok(true)
    }

    async fn match_get(&self, id: &str) -> CoreResult<Option<Match>> {
        let conn = self.conn.lock().await;
        match conn.query_row(
            "SELECT * FROM matches WHERE id = ?",
            params![id],
            row_to_match,
        ) {
            Ok(m) => Ok(Some(m)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn matches_list(&self, filter: &MatchFilter) -> CoreResult<Vec<Match>> {
        let conn = self.conn.lock().await;
        let mut sql = "SELECT * FROM matches WHERE 1=1".to_string();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(status.as_str().to_string()));
        }
        if let Some(before) = filter.created_before {
            sql.push_str(" AND created_at <= ?");
            args.push(Box::new(before));
        }
        sql.push_str(" ORDER BY created_at ASC");

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), row_to_match)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    async fn match_update_status(
        &self,
        id: &str,
        status: MatchStatus,
        completed_at: Option<i64>,
        note: Option<&str>,
    ) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE matches SET status = ?2,
                    completed_at = COALESCE(?3, completed_at),
                    note = COALESCE(?4, note)
                 WHERE id = ?1",
                params![id, status.as_str(), completed_at, note],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(CoreError::NotFound(format!("match '{id}'")));
        }
        Ok(())
    }

    async fn audit_append(&self, entry: &AuditEntry) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO audit_log (entity, entity_id, action, actor, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.entity,
                entry.entity_id,
                entry.action,
                entry.actor,
                entry.detail,
                entry.created_at,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}
