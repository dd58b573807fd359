//! Async front end of the RLC stack
//!
//! A single tokio task owns the [`Rlc`] and processes [`RlcCommand`]s in arrival
//! order, so PDCP traffic, MAC traffic and timer ticks never run concurrently.
//! Requests that need an answer carry a oneshot sender.

use super::config::RlcConfig;
use super::metrics::RlcBearerMetrics;
use super::sdu_queue::RlcSdu;
use super::stack::Rlc;
use crate::LayerError;
use async_trait::async_trait;
use bytes::Bytes;
use common::types::Lcid;
use interfaces::{BufferState, InterfaceError, MacRlcInterface};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Capacity of the command channel
pub const COMMAND_CHANNEL_SIZE: usize = 1024;

/// Timer resolution of all RLC timers
pub const TICK_PERIOD: Duration = Duration::from_millis(1);

type Reply<T> = oneshot::Sender<Result<T, LayerError>>;

/// Work items for the RLC task
#[derive(Debug)]
pub enum RlcCommand {
    AddBearer {
        lcid: Lcid,
        cfg: RlcConfig,
        reply: Reply<()>,
    },
    DelBearer {
        lcid: Lcid,
        reply: Reply<()>,
    },
    ChangeLcid {
        old_lcid: Lcid,
        new_lcid: Lcid,
        reply: Reply<()>,
    },
    SuspendBearer {
        lcid: Lcid,
        reply: Reply<()>,
    },
    ResumeBearer {
        lcid: Lcid,
        reply: Reply<()>,
    },
    /// One bearer, or all of them with `None`
    Reestablish {
        lcid: Option<Lcid>,
        reply: Reply<()>,
    },
    Reset,
    Stop,
    WriteSdu {
        lcid: Lcid,
        sdu: RlcSdu,
        reply: Reply<()>,
    },
    DiscardSdu {
        lcid: Lcid,
        pdcp_sn: u32,
    },
    ReadPdu {
        lcid: Lcid,
        nof_bytes: usize,
        reply: Reply<Option<Bytes>>,
    },
    WritePdu {
        lcid: Lcid,
        pdu: Bytes,
    },
    GetBufferState {
        lcid: Lcid,
        reply: Reply<BufferState>,
    },
    GetMetrics {
        reply: oneshot::Sender<BTreeMap<Lcid, RlcBearerMetrics>>,
    },
    Tick,
    Shutdown,
}

pub struct RlcTask {
    rlc: Rlc,
    commands: mpsc::Receiver<RlcCommand>,
}

impl RlcTask {
    /// Start the task with a 1 ms timer
    pub fn spawn(rlc: Rlc) -> (RlcHandle, JoinHandle<()>) {
        Self::spawn_with_tick(rlc, Some(TICK_PERIOD))
    }

    /// Start the task; without a tick period timers only advance through
    /// [`RlcHandle::tick`]
    pub fn spawn_with_tick(rlc: Rlc, tick_period: Option<Duration>) -> (RlcHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        if let Some(period) = tick_period {
            let ticks = tx.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    if ticks.send(RlcCommand::Tick).await.is_err() {
                        break;
                    }
                }
                debug!("RLC timer stopped");
            });
        }

        let task = Self { rlc, commands: rx };
        let join = tokio::spawn(task.run());
        (RlcHandle { tx }, join)
    }

    async fn run(mut self) {
        info!("RLC task started");
        while let Some(cmd) = self.commands.recv().await {
            if !self.handle(cmd) {
                break;
            }
        }
        self.rlc.stop();
        info!("RLC task stopped");
    }

    /// Returns false once the task should exit
    fn handle(&mut self, cmd: RlcCommand) -> bool {
        match cmd {
            RlcCommand::AddBearer { lcid, cfg, reply } => {
                let _ = reply.send(self.rlc.add_bearer(lcid, cfg));
            }
            RlcCommand::DelBearer { lcid, reply } => {
                let _ = reply.send(self.rlc.del_bearer(lcid));
            }
            RlcCommand::ChangeLcid {
                old_lcid,
                new_lcid,
                reply,
            } => {
                let _ = reply.send(self.rlc.change_lcid(old_lcid, new_lcid));
            }
            RlcCommand::SuspendBearer { lcid, reply } => {
                let _ = reply.send(self.rlc.suspend_bearer(lcid));
            }
            RlcCommand::ResumeBearer { lcid, reply } => {
                let _ = reply.send(self.rlc.resume_bearer(lcid));
            }
            RlcCommand::Reestablish { lcid, reply } => {
                let result = match lcid {
                    Some(lcid) => self.rlc.reestablish(lcid),
                    None => {
                        self.rlc.reestablish_all();
                        Ok(())
                    }
                };
                let _ = reply.send(result);
            }
            RlcCommand::Reset => self.rlc.reset(),
            RlcCommand::Stop => self.rlc.stop(),
            RlcCommand::WriteSdu { lcid, sdu, reply } => {
                let _ = reply.send(self.rlc.write_sdu(lcid, sdu));
            }
            RlcCommand::DiscardSdu { lcid, pdcp_sn } => {
                if let Err(e) = self.rlc.discard_sdu(lcid, pdcp_sn) {
                    warn!("Discard of PDCP SN {} failed: {}", pdcp_sn, e);
                }
            }
            RlcCommand::ReadPdu {
                lcid,
                nof_bytes,
                reply,
            } => {
                let _ = reply.send(self.rlc.read_pdu(lcid, nof_bytes));
            }
            RlcCommand::WritePdu { lcid, pdu } => {
                if let Err(e) = self.rlc.write_pdu(lcid, pdu) {
                    warn!("Dropping PDU for LCID {}: {}", lcid, e);
                }
            }
            RlcCommand::GetBufferState { lcid, reply } => {
                let _ = reply.send(self.rlc.get_buffer_state(lcid));
            }
            RlcCommand::GetMetrics { reply } => {
                let _ = reply.send(self.rlc.get_metrics());
            }
            RlcCommand::Tick => self.rlc.tick(),
            RlcCommand::Shutdown => return false,
        }
        true
    }
}

/// Cloneable handle to a running [`RlcTask`]
#[derive(Clone)]
pub struct RlcHandle {
    tx: mpsc::Sender<RlcCommand>,
}

impl RlcHandle {
    async fn send(&self, cmd: RlcCommand) -> Result<(), LayerError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| LayerError::ChannelClosed)
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> RlcCommand) -> Result<T, LayerError> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply)).await?;
        response.await.map_err(|_| LayerError::ChannelClosed)?
    }

    pub async fn add_bearer(&self, lcid: Lcid, cfg: RlcConfig) -> Result<(), LayerError> {
        self.request(|reply| RlcCommand::AddBearer { lcid, cfg, reply })
            .await
    }

    pub async fn del_bearer(&self, lcid: Lcid) -> Result<(), LayerError> {
        self.request(|reply| RlcCommand::DelBearer { lcid, reply }).await
    }

    pub async fn change_lcid(&self, old_lcid: Lcid, new_lcid: Lcid) -> Result<(), LayerError> {
        self.request(|reply| RlcCommand::ChangeLcid {
            old_lcid,
            new_lcid,
            reply,
        })
        .await
    }

    pub async fn suspend_bearer(&self, lcid: Lcid) -> Result<(), LayerError> {
        self.request(|reply| RlcCommand::SuspendBearer { lcid, reply })
            .await
    }

    pub async fn resume_bearer(&self, lcid: Lcid) -> Result<(), LayerError> {
        self.request(|reply| RlcCommand::ResumeBearer { lcid, reply })
            .await
    }

    pub async fn reestablish(&self, lcid: Option<Lcid>) -> Result<(), LayerError> {
        self.request(|reply| RlcCommand::Reestablish { lcid, reply })
            .await
    }

    pub async fn reset(&self) -> Result<(), LayerError> {
        self.send(RlcCommand::Reset).await
    }

    pub async fn stop(&self) -> Result<(), LayerError> {
        self.send(RlcCommand::Stop).await
    }

    pub async fn write_sdu(&self, lcid: Lcid, sdu: RlcSdu) -> Result<(), LayerError> {
        self.request(|reply| RlcCommand::WriteSdu { lcid, sdu, reply })
            .await
    }

    pub async fn discard_sdu(&self, lcid: Lcid, pdcp_sn: u32) -> Result<(), LayerError> {
        self.send(RlcCommand::DiscardSdu { lcid, pdcp_sn }).await
    }

    pub async fn get_metrics(&self) -> Result<BTreeMap<Lcid, RlcBearerMetrics>, LayerError> {
        let (reply, response) = oneshot::channel();
        self.send(RlcCommand::GetMetrics { reply }).await?;
        response.await.map_err(|_| LayerError::ChannelClosed)
    }

    /// Advance all timers by 1 ms
    pub async fn tick(&self) -> Result<(), LayerError> {
        self.send(RlcCommand::Tick).await
    }

    pub async fn shutdown(&self) -> Result<(), LayerError> {
        self.send(RlcCommand::Shutdown).await
    }
}

impl From<LayerError> for InterfaceError {
    fn from(e: LayerError) -> Self {
        match e {
            LayerError::BearerNotFound(lcid) => InterfaceError::UnknownLcid(lcid),
            LayerError::ChannelClosed => InterfaceError::ChannelClosed("RLC task".into()),
            LayerError::QueueFull => InterfaceError::BufferFull,
            _ => InterfaceError::InvalidMessage,
        }
    }
}

#[async_trait]
impl MacRlcInterface for RlcHandle {
    async fn read_pdu(&self, lcid: Lcid, nof_bytes: usize) -> Result<Option<Bytes>, InterfaceError> {
        Ok(self
            .request(|reply| RlcCommand::ReadPdu {
                lcid,
                nof_bytes,
                reply,
            })
            .await?)
    }

    async fn write_pdu(&self, lcid: Lcid, pdu: Bytes) -> Result<(), InterfaceError> {
        Ok(self.send(RlcCommand::WritePdu { lcid, pdu }).await?)
    }

    async fn get_buffer_state(&self, lcid: Lcid) -> Result<BufferState, InterfaceError> {
        Ok(self
            .request(|reply| RlcCommand::GetBufferState { lcid, reply })
            .await?)
    }
}
