#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vulndash_rs::scanner::{CapabilityError, ScanCapability};
use vulndash_rs::store::{FindingStore, SqliteFindingStore, StoreError};
use vulndash_rs::tracker::JobTracker;
use vulndash_rs::types::{Finding, JobStatus, NewFinding};
use uuid::Uuid;

/// Render an nmap XML report with one host and the given `(portid, state, service)` ports.
pub fn nmap_report(addr: &str, ports: &[(&str, &str, &str)]) -> String {
    let mut body = String::new();
    for (id, state, service) in ports {
        body.push_str(&format!(
            r#"<port protocol="tcp" portid="{id}"><state state="{state}" reason="syn-ack"/><service name="{service}" method="table"/></port>"#
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -oX - {addr}" version="7.94">
<host starttime="1700000000"><status state="up" reason="arp-response"/>
<address addr="{addr}" addrtype="ipv4"/>
<ports><extraports state="closed" count="998"/>{body}</ports>
</host>
<runstats><finished time="1700000005"/></runstats>
</nmaprun>"#
    )
}

/// Scan capability backed by a closure; counts invocations.
pub struct FnScanner<F> {
    f: F,
    pub calls: AtomicUsize,
}

impl<F> FnScanner<F>
where
    F: Fn(&str) -> Result<String, CapabilityError> + Send + Sync,
{
    pub fn new(f: F) -> Arc<Self> {
        Arc::new(Self {
            f,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl<F> ScanCapability for FnScanner<F>
where
    F: Fn(&str) -> Result<String, CapabilityError> + Send + Sync,
{
    async fn scan(&self, target: &str) -> Result<String, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        (self.f)(target)
    }
}

/// Never finishes within any sane timeout.
pub struct HangingScanner;

#[async_trait]
impl ScanCapability for HangingScanner {
    async fn scan(&self, _target: &str) -> Result<String, CapabilityError> {
        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        Ok(String::new())
    }
}

pub struct PanickingScanner;

#[async_trait]
impl ScanCapability for PanickingScanner {
    async fn scan(&self, _target: &str) -> Result<String, CapabilityError> {
        panic!("scanner blew up");
    }
}

/// Real SQLite store whose inserts always fail before writing anything.
pub struct FailingInsertStore {
    pub inner: SqliteFindingStore,
}

impl FailingInsertStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteFindingStore::open_in_memory().unwrap(),
        })
    }
}

#[async_trait]
impl FindingStore for FailingInsertStore {
    async fn insert_many(&self, _findings: Vec<NewFinding>) -> Result<usize, StoreError> {
        Err(StoreError::Unavailable("disk I/O error".into()))
    }

    async fn list_recent(&self, limit: Option<usize>) -> Result<Vec<Finding>, StoreError> {
        self.inner.list_recent(limit).await
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        self.inner.delete_all().await
    }
}

/// Poll the tracker until the job is terminal.
pub async fn wait_terminal(tracker: &JobTracker, id: Uuid) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status = tracker.status(id).await.expect("job exists");
            if status.state.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job reached a terminal state")
}
