//! Async runtime driver
//!
//! Runs the clock engine on tokio: waits for either the frame timer deadline
//! or the next indication from the transceiver link and feeds the event to
//! the engine, which dispatches the due frames synchronously.

use crate::clock::{ClockEngine, ClockEvent};
use crate::dispatch::Dispatcher;
use crate::timer::Timestamp;
use crate::{ClockError, L1Scheduler};
use interfaces::{Transceiver, TrxIndication};
use std::future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Clock engine and dispatcher driven by a tokio event loop
pub struct L1Runtime<T: Transceiver, L: L1Scheduler> {
    engine: ClockEngine,
    dispatcher: Dispatcher<T, L>,
}

impl<T: Transceiver, L: L1Scheduler> L1Runtime<T, L> {
    pub fn new(engine: ClockEngine, dispatcher: Dispatcher<T, L>) -> Self {
        Self { engine, dispatcher }
    }

    pub fn engine(&self) -> &ClockEngine {
        &self.engine
    }

    pub fn dispatcher(&self) -> &Dispatcher<T, L> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<T, L> {
        &mut self.dispatcher
    }

    /// Process timer expirations and transceiver indications.
    ///
    /// Returns `Ok` once the indication channel is closed and
    /// `Err(ClockError::ClockLost)` as soon as the clock is lost.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<TrxIndication>) -> Result<(), ClockError> {
        let epoch = Instant::now();
        info!("L1 runtime started");

        loop {
            let deadline = self.engine.deadline().map(|ts| to_instant(epoch, ts));

            tokio::select! {
                biased;

                _ = sleep_until_opt(deadline) => {
                    let now = to_timestamp(epoch, Instant::now());
                    self.engine.handle(ClockEvent::TimerExpired, now, &mut self.dispatcher)?;
                }

                ind = rx.recv() => {
                    let now = to_timestamp(epoch, Instant::now());
                    match ind {
                        Some(ind) => self.handle_indication(ind, now)?,
                        None => {
                            info!("Transceiver link closed, stopping L1 runtime");
                            self.engine.handle(ClockEvent::Stop, now, &mut self.dispatcher)?;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn handle_indication(&mut self, ind: TrxIndication, now: Timestamp) -> Result<(), ClockError> {
        let ev = match ind {
            TrxIndication::ClockStarted => ClockEvent::Start,
            TrxIndication::ClockStopped => ClockEvent::Stop,
            TrxIndication::Clock(fn_) => ClockEvent::ClockInd(fn_),
            TrxIndication::UlBurst { trx, bi } => {
                if let Err(e) = self.dispatcher.route_burst_ind(trx, bi) {
                    debug!("Dropped uplink burst: {}", e);
                }
                return Ok(());
            }
        };

        if let Err(e) = self.engine.handle(ev, now, &mut self.dispatcher) {
            if let ClockError::InvalidState(ref reason) = e {
                warn!("Ignoring {:?}: {}", ev, reason);
                return Ok(());
            }
            return Err(e);
        }
        Ok(())
    }
}

fn to_timestamp(epoch: Instant, now: Instant) -> Timestamp {
    Timestamp::from_nanos(now.duration_since(epoch).as_nanos() as i64)
}

fn to_instant(epoch: Instant, ts: Timestamp) -> Instant {
    epoch + Duration::from_nanos(ts.as_nanos().max(0) as u64)
}

/// Sleep until `deadline`, or forever when there is none
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending::<()>().await,
    }
}
