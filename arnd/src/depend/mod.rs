/*
 * This file is a part of Arn
 */

//! Dependency coordinator (component H, §4.8): "is service X ready,
//! optionally in state Y?". Grounded on the original's `ArnDepend.cpp`
//! pairing one echo pipe with two state items (`ArnDependOffer` /
//! `ArnDependWork`); the 10s refresh timer and echo/state wait are driven
//! off `tokio::time` per §4.8.a.

use crate::ctx::Context;
use crate::error::{ArnError, ArnResult, ErrorKind, Subsystem};
use crate::handle::pipe::Pipe;
use crate::handle::Handle;
use crate::tree::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

fn base_path(service: &str) -> String {
    format!("//.sys/Depend/{service}")
}

/// Offer side: `advertise` creates the provider triple and echoes back
/// whatever a requester sends on `echoPipe!` (§4.8 "Offer side").
pub struct DependOffer {
    echo_pipe: Pipe,
    state_name: Handle,
    state_id: Handle,
}

impl DependOffer {
    pub fn advertise(ctx: &Arc<Context>, service: &str) -> ArnResult<DependOffer> {
        let base = base_path(service);
        let echo_pipe = Pipe::open(ctx, &format!("{base}/echoPipe!"))?;
        let state_name = Handle::open(ctx, &format!("{base}/stateName"))?;
        let state_id = Handle::open(ctx, &format!("{base}/stateId"))?;
        Ok(DependOffer { echo_pipe, state_name, state_id })
    }

    pub fn set_state_name(&self, name: &str) -> ArnResult<()> {
        self.state_name.set_value(Value::String(name.to_string())).map(|_| ())
    }

    pub fn set_state_id(&self, id: i64) -> ArnResult<()> {
        self.state_id.set_value(Value::Int(id)).map(|_| ())
    }

    /// Reflect every request byte-string back on the same pipe's twin,
    /// until the offer is dropped.
    pub async fn serve(&mut self) {
        while let Some(msg) = self.echo_pipe.recv().await {
            let _ = self.echo_pipe.write(msg.value);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateCheck {
    Name(String),
    Id(i64),
}

#[derive(Debug, Clone)]
pub struct DependencySpec {
    pub service: String,
    pub want_state: Option<StateCheck>,
}

impl DependencySpec {
    pub fn new(service: impl Into<String>) -> Self {
        DependencySpec { service: service.into(), want_state: None }
    }

    pub fn with_state(mut self, check: StateCheck) -> Self {
        self.want_state = Some(check);
        self
    }
}

/// Requester side: resolves once every registered dependency is echo-OK and
/// (if requested) state-OK. `start` provides the compositional guarantee
/// that `completed` is reached exactly once, after all of them.
pub struct DependRequester;

impl DependRequester {
    pub async fn start(ctx: Arc<Context>, deps: Vec<DependencySpec>) -> ArnResult<()> {
        let mut tasks = Vec::with_capacity(deps.len());
        for dep in deps {
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move { Self::wait_one(&ctx, dep).await }));
        }
        for task in tasks {
            task.await
                .map_err(|e| ArnError::new(ErrorKind::Undef, Subsystem::Depend, e.to_string()))??;
        }
        Ok(())
    }

    async fn wait_one(ctx: &Arc<Context>, dep: DependencySpec) -> ArnResult<()> {
        let base = base_path(&dep.service);
        let mut echo_pipe = Pipe::open(ctx, &format!("{base}/echoPipe"))?;
        let state_name = Handle::open(ctx, &format!("{base}/stateName"))?;
        let state_id = Handle::open(ctx, &format!("{base}/stateId"))?;

        let token = Uuid::new_v4().as_bytes().to_vec();
        echo_pipe.write(Value::Bytes(token.clone()))?;

        let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
        refresh.tick().await; // first tick fires immediately; we already sent once
        loop {
            tokio::select! {
                msg = echo_pipe.recv() => {
                    match msg {
                        Some(m) if m.value == Value::Bytes(token.clone()) => break,
                        Some(_) => continue,
                        None => return Err(ArnError::new(ErrorKind::Timeout, Subsystem::Depend, "echo pipe closed")),
                    }
                }
                _ = refresh.tick() => {
                    let _ = echo_pipe.write(Value::Bytes(token.clone()));
                }
            }
        }

        if let Some(check) = &dep.want_state {
            loop {
                let satisfied = match check {
                    StateCheck::Name(want) => matches!(state_name.get_value()?, Value::String(s) if &s == want),
                    StateCheck::Id(want) => matches!(state_id.get_value()?, Value::Int(i) if i >= *want),
                };
                if satisfied {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::Context;

    #[tokio::test]
    async fn completes_once_offer_reaches_the_requested_state() {
        let ctx = Context::new();
        let mut offer = DependOffer::advertise(&ctx, "PersistSvc").unwrap();
        offer.set_state_id(0).unwrap();
        let ctx_offer = ctx.clone();
        tokio::spawn(async move {
            let _ = &ctx_offer;
            offer.serve().await;
        });

        let ctx2 = ctx.clone();
        let waiter = tokio::spawn(async move {
            DependRequester::start(
                ctx2,
                vec![DependencySpec::new("PersistSvc").with_state(StateCheck::Id(1))],
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        let bump = Handle::open(&ctx, "//.sys/Depend/PersistSvc/stateId").unwrap();
        bump.set_value(Value::Int(2)).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), waiter).await;
        assert!(result.is_ok(), "dependency wait never completed");
        result.unwrap().unwrap().unwrap();
    }
}
