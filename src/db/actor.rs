use crate::db::models::{Expected, Revision, UserKey};
use crate::db::sqlite::{ResourceStorage, connect};
use crate::error::PortalError;
use crate::types::{Database, DatabaseUser, DnsRecord, Domain};

use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::time::Duration;
use tracing::{debug, info};

type Reply<T> = RpcReplyPort<Result<T, PortalError>>;

/// Mutations handled by the store actor. Each one is applied in arrival
/// order, so concurrent writers never interleave inside a CAS check.
#[derive(Debug)]
pub enum StoreMessage {
    PutDatabase(Database, Expected, Reply<Database>),
    DeleteDatabase(String, Revision, Reply<()>),
    PutUser(DatabaseUser, Expected, Reply<DatabaseUser>),
    DeleteUser(UserKey, Revision, Reply<()>),
    PutDomain(Domain, Expected, Reply<Domain>),
    /// Cascades to the domain's DNS records; replies with the number removed.
    DeleteDomain(String, Revision, Reply<u64>),
    PutDnsRecord(DnsRecord, Expected, Reply<DnsRecord>),
    DeleteDnsRecord(i64, Revision, Reply<()>),
}

/// Cloneable handle to the resource store.
///
/// Reads go straight to the connection pool; writes are funnelled through
/// the actor.
#[derive(Clone)]
pub struct StoreHandle {
    actor: ActorRef<StoreMessage>,
    storage: ResourceStorage,
    call_timeout_ms: u64,
}

/// Call the store actor with a timeout and flatten transport failures into
/// `StoreUnavailable`.
macro_rules! store_call {
    ($self:ident, $variant:ident, $($arg:expr),+) => {
        ractor::call_t!(
            $self.actor,
            StoreMessage::$variant,
            $self.call_timeout_ms,
            $($arg),+
        )
        .map_err(|e| {
            PortalError::StoreUnavailable(format!(concat!(stringify!($variant), " RPC failed: {}"), e))
        })?
    };
}

impl StoreHandle {
    pub async fn get_database(&self, name: &str) -> Result<Option<Database>, PortalError> {
        self.storage.get_database(name).await
    }

    pub async fn list_databases(&self) -> Result<Vec<Database>, PortalError> {
        self.storage.list_databases().await
    }

    pub async fn put_database(
        &self,
        db: Database,
        expected: Expected,
    ) -> Result<Database, PortalError> {
        store_call!(self, PutDatabase, db, expected)
    }

    pub async fn delete_database(&self, name: &str, expected: Revision) -> Result<(), PortalError> {
        store_call!(self, DeleteDatabase, name.to_string(), expected)
    }

    pub async fn get_user(&self, key: &UserKey) -> Result<Option<DatabaseUser>, PortalError> {
        self.storage.get_user(key).await
    }

    pub async fn list_users(&self) -> Result<Vec<DatabaseUser>, PortalError> {
        self.storage.list_users().await
    }

    pub async fn put_user(
        &self,
        user: DatabaseUser,
        expected: Expected,
    ) -> Result<DatabaseUser, PortalError> {
        store_call!(self, PutUser, user, expected)
    }

    pub async fn delete_user(&self, key: &UserKey, expected: Revision) -> Result<(), PortalError> {
        store_call!(self, DeleteUser, key.clone(), expected)
    }

    pub async fn get_domain(&self, domain: &str) -> Result<Option<Domain>, PortalError> {
        self.storage.get_domain(domain).await
    }

    pub async fn list_domains(&self) -> Result<Vec<Domain>, PortalError> {
        self.storage.list_domains().await
    }

    pub async fn put_domain(&self, d: Domain, expected: Expected) -> Result<Domain, PortalError> {
        store_call!(self, PutDomain, d, expected)
    }

    pub async fn delete_domain(&self, domain: &str, expected: Revision) -> Result<u64, PortalError> {
        store_call!(self, DeleteDomain, domain.to_string(), expected)
    }

    pub async fn get_dns_record(&self, id: i64) -> Result<Option<DnsRecord>, PortalError> {
        self.storage.get_dns_record(id).await
    }

    pub async fn find_dns_record(
        &self,
        domain: &str,
        record_type: &str,
        name: &str,
        value: &str,
    ) -> Result<Option<DnsRecord>, PortalError> {
        self.storage
            .find_dns_record(domain, record_type, name, value)
            .await
    }

    pub async fn list_dns_records(&self, domain: &str) -> Result<Vec<DnsRecord>, PortalError> {
        self.storage.list_dns_records(domain).await
    }

    pub async fn put_dns_record(
        &self,
        rec: DnsRecord,
        expected: Expected,
    ) -> Result<DnsRecord, PortalError> {
        store_call!(self, PutDnsRecord, rec, expected)
    }

    pub async fn delete_dns_record(&self, id: i64, expected: Revision) -> Result<(), PortalError> {
        store_call!(self, DeleteDnsRecord, id, expected)
    }

    /// Stop the writer; subsequent mutations fail with `StoreUnavailable`.
    pub fn stop(&self) {
        self.actor.stop(Some("store shutdown".to_string()));
    }
}

struct StoreActor;

#[ractor::async_trait]
impl Actor for StoreActor {
    type Msg = StoreMessage;
    type State = ResourceStorage;
    type Arguments = ResourceStorage;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        storage: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!("StoreActor started");
        Ok(storage)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        storage: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        // A dropped reply port means the caller timed out; nothing to do.
        match message {
            StoreMessage::PutDatabase(db, expected, rp) => {
                debug!(name = %db.name, ?expected, "put database");
                let _ = rp.send(storage.put_database(&db, expected).await);
            }
            StoreMessage::DeleteDatabase(name, expected, rp) => {
                debug!(%name, expected, "delete database");
                let _ = rp.send(storage.delete_database(&name, expected).await);
            }
            StoreMessage::PutUser(user, expected, rp) => {
                debug!(name = %user.name, host = %user.host, ?expected, "put user");
                let _ = rp.send(storage.put_user(&user, expected).await);
            }
            StoreMessage::DeleteUser(key, expected, rp) => {
                debug!(user = %key, expected, "delete user");
                let _ = rp.send(storage.delete_user(&key, expected).await);
            }
            StoreMessage::PutDomain(d, expected, rp) => {
                debug!(domain = %d.domain, ?expected, "put domain");
                let _ = rp.send(storage.put_domain(&d, expected).await);
            }
            StoreMessage::DeleteDomain(domain, expected, rp) => {
                debug!(%domain, expected, "delete domain");
                let _ = rp.send(storage.delete_domain(&domain, expected).await);
            }
            StoreMessage::PutDnsRecord(rec, expected, rp) => {
                debug!(domain = %rec.domain, name = %rec.name, ?expected, "put dns record");
                let _ = rp.send(storage.put_dns_record(&rec, expected).await);
            }
            StoreMessage::DeleteDnsRecord(id, expected, rp) => {
                debug!(id, expected, "delete dns record");
                let _ = rp.send(storage.delete_dns_record(id, expected).await);
            }
        }
        Ok(())
    }
}

/// Open the database at `database_url`, initialize the schema and spawn the
/// store actor.
pub async fn spawn(database_url: &str, call_timeout: Duration) -> Result<StoreHandle, PortalError> {
    let pool = connect(database_url).await?;
    let storage = ResourceStorage::new(pool);
    storage.init_schema().await?;

    let (actor, _jh) = Actor::spawn(None, StoreActor, storage.clone())
        .await
        .map_err(|e| PortalError::StoreUnavailable(format!("spawn StoreActor failed: {e}")))?;

    Ok(StoreHandle {
        actor,
        storage,
        call_timeout_ms: u64::try_from(call_timeout.as_millis()).unwrap_or(u64::MAX),
    })
}
