//! Test support: an in-memory datastore that counts every transaction it
//! hands out, plus config, mailer and token helpers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::auth::{issue_token, Claims};
use crate::config::{AppConfig, Environment};
use crate::database::{Account, DatabaseError, Datastore, Membership, Role, Transactional};
use crate::notify::Mailer;

pub const TEST_SECRET: &str = "pipeline-test-secret";

#[derive(Default)]
struct Store {
    accounts: HashMap<Uuid, Account>,
    members: HashMap<(Uuid, Uuid), Membership>,
    rows: Vec<String>,
}

#[derive(Default)]
struct Counters {
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
    account_lookups: AtomicUsize,
    membership_lookups: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryDatastore {
    store: Arc<Mutex<Store>>,
    counters: Arc<Counters>,
    fail_commits: Arc<AtomicBool>,
    fail_begins: Arc<AtomicBool>,
    fail_rollbacks: Arc<AtomicBool>,
    stall_commits: Arc<AtomicBool>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, email: &str, disabled: bool) -> Account {
        let account = Account {
            id: Uuid::new_v4(),
            email: email.to_string(),
            disabled,
        };
        self.store
            .lock()
            .unwrap()
            .accounts
            .insert(account.id, account.clone());
        account
    }

    pub fn add_membership(&self, account_id: Uuid, workspace_id: Uuid, role: Role) {
        self.store.lock().unwrap().members.insert(
            (account_id, workspace_id),
            Membership {
                workspace_id,
                account_id,
                role,
            },
        );
    }

    /// Make every subsequent commit fail
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent begin (and health check) fail, as if the
    /// database were unreachable
    pub fn fail_begins(&self, fail: bool) {
        self.fail_begins.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent rollback report an error. The writes are still
    /// discarded, as when a connection dies mid-rollback.
    pub fn fail_rollbacks(&self, fail: bool) {
        self.fail_rollbacks.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent commit hang far past any request deadline
    pub fn stall_commits(&self, stall: bool) {
        self.stall_commits.store(stall, Ordering::SeqCst);
    }

    /// Rows made visible by committed transactions
    pub fn rows(&self) -> Vec<String> {
        self.store.lock().unwrap().rows.clone()
    }

    pub fn begun(&self) -> usize {
        self.counters.begun.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> usize {
        self.counters.committed.load(Ordering::SeqCst)
    }

    pub fn rolled_back(&self) -> usize {
        self.counters.rolled_back.load(Ordering::SeqCst)
    }

    /// Transactions begun but neither committed nor rolled back
    pub fn open(&self) -> usize {
        self.begun() - self.committed() - self.rolled_back()
    }

    pub fn account_lookups(&self) -> usize {
        self.counters.account_lookups.load(Ordering::SeqCst)
    }

    pub fn membership_lookups(&self) -> usize {
        self.counters.membership_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, DatabaseError> {
        if self.fail_begins.load(Ordering::SeqCst) {
            return Err(DatabaseError::Backend("connection refused".to_string()));
        }
        self.counters.begun.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTransaction {
            store: Arc::clone(&self.store),
            counters: Arc::clone(&self.counters),
            fail_commit: self.fail_commits.load(Ordering::SeqCst),
            fail_rollback: self.fail_rollbacks.load(Ordering::SeqCst),
            stall_commit: self.stall_commits.load(Ordering::SeqCst),
            pending: Vec::new(),
            finished: false,
        })
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        if self.fail_begins.load(Ordering::SeqCst) {
            return Err(DatabaseError::Backend("connection refused".to_string()));
        }
        Ok(())
    }
}

/// Writes stay in `pending` until commit. Dropping an unfinished
/// transaction counts as a rollback.
pub struct MemoryTransaction {
    store: Arc<Mutex<Store>>,
    counters: Arc<Counters>,
    fail_commit: bool,
    fail_rollback: bool,
    stall_commit: bool,
    pending: Vec<String>,
    finished: bool,
}

impl MemoryTransaction {
    pub fn insert_row(&mut self, value: impl Into<String>) {
        self.pending.push(value.into());
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Transactional for MemoryTransaction {
    async fn find_account(&mut self, id: Uuid) -> Result<Option<Account>, DatabaseError> {
        self.counters.account_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.lock().unwrap().accounts.get(&id).cloned())
    }

    async fn find_membership(
        &mut self,
        account_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Option<Membership>, DatabaseError> {
        self.counters.membership_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .store
            .lock()
            .unwrap()
            .members
            .get(&(account_id, workspace_id))
            .cloned())
    }

    async fn commit(mut self) -> Result<(), DatabaseError> {
        if self.stall_commit {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.finished = true;
        if self.fail_commit {
            self.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
            return Err(DatabaseError::Backend("commit refused".to_string()));
        }

        let pending = mem::take(&mut self.pending);
        self.store.lock().unwrap().rows.extend(pending);
        self.counters.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), DatabaseError> {
        self.finished = true;
        self.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
        if self.fail_rollback {
            return Err(DatabaseError::Backend("connection reset during rollback".to_string()));
        }
        Ok(())
    }
}

/// Development preset with a known secret and a one second deadline
pub fn test_config() -> Arc<AppConfig> {
    let mut config = AppConfig::preset(Environment::Development);
    config.security.jwt_secret = TEST_SECRET.to_string();
    config.server.request_timeout_secs = 1;
    Arc::new(config)
}

pub fn test_mailer(config: &AppConfig) -> Mailer {
    Mailer::from_config(&config.mail).unwrap()
}

pub fn token_for(account_id: Uuid) -> String {
    issue_token(TEST_SECRET, &Claims::with_expiry_hours(account_id, 1).unwrap()).unwrap()
}

pub fn expired_token_for(account_id: Uuid) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: account_id,
        iat: now - 7200,
        exp: now - 3600,
    };
    issue_token(TEST_SECRET, &claims).unwrap()
}
