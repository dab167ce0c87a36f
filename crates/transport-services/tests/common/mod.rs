//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use tokio::io::DuplexStream;

use transport_services::establishment::{Connector, EstablishmentConfig, TransportSession};
use transport_services::resolver::StaticLookup;
use transport_services::{EndpointResolver, EstablishmentEngine, FailureReason, ResolvedCandidate};

/// What a scripted attempt does.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed(Duration),
    Fail(Duration, FailureReason),
    Hang,
}

/// A connector whose attempts follow a per-address script.
///
/// Successful attempts hand out one end of an in-memory duplex pipe and
/// keep the other end for the test.
#[derive(Default)]
pub struct ScriptedConnector {
    scripts: Mutex<HashMap<IpAddr, Script>>,
    started: Mutex<Vec<(IpAddr, Instant)>>,
    peers: Mutex<Vec<DuplexStream>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, ip: IpAddr, script: Script) {
        self.scripts.lock().unwrap().insert(ip, script);
    }

    pub fn started(&self) -> Vec<IpAddr> {
        self.started.lock().unwrap().iter().map(|(ip, _)| *ip).collect()
    }

    pub fn start_times(&self) -> Vec<Instant> {
        self.started.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }

    pub fn take_peer(&self) -> Option<DuplexStream> {
        self.peers.lock().unwrap().pop()
    }
}

impl Connector for ScriptedConnector {
    fn connect<'a>(
        &'a self,
        candidate: &'a ResolvedCandidate,
    ) -> BoxFuture<'a, Result<TransportSession, FailureReason>> {
        Box::pin(async move {
            let ip = candidate.address.ip();
            self.started.lock().unwrap().push((ip, Instant::now()));
            let script = self
                .scripts
                .lock()
                .unwrap()
                .get(&ip)
                .cloned()
                .unwrap_or(Script::Fail(Duration::ZERO, FailureReason::Refused));

            match script {
                Script::Succeed(delay) => {
                    tokio::time::sleep(delay).await;
                    let (client, server) = tokio::io::duplex(64 * 1024);
                    self.peers.lock().unwrap().push(server);
                    Ok(TransportSession::stream(client, candidate.address))
                }
                Script::Fail(delay, reason) => {
                    tokio::time::sleep(delay).await;
                    Err(reason)
                }
                Script::Hang => std::future::pending().await,
            }
        })
    }
}

pub fn addr(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 0, 2, last))
}

/// An engine resolving "race.test" to 192.0.2.1..=count through `connector`.
pub fn scripted_engine(
    connector: &Arc<ScriptedConnector>,
    count: u8,
    config: EstablishmentConfig,
) -> EstablishmentEngine {
    let lookup = StaticLookup::new().with_host("race.test", (1..=count).map(addr));
    EstablishmentEngine::new(EndpointResolver::new(lookup))
        .with_shared_connector(Arc::clone(connector) as Arc<dyn Connector>)
        .with_config(config)
}
