//! RLC entity: one bearer in any mode behind a single surface
//!
//! The engine is a closed set of variants. While suspended the entity holds
//! inbound PDUs and outbound SDUs in bounded FIFOs and replays them on resume.

use super::am_lte::RlcAmLte;
use super::am_nr::RlcAmNr;
use super::config::RlcConfig;
use super::metrics::RlcBearerMetrics;
use super::sdu_queue::RlcSdu;
use super::tm::RlcTm;
use super::um_lte::RlcUmLte;
use super::um_nr::RlcUmNr;
use super::{max_sdu_size, RlcContext};
use crate::LayerError;
use bytes::Bytes;
use common::types::{Lcid, Rat, RlcMode};
use interfaces::{BsrCallback, BufferState};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Capacity of each of the two queues filled while a bearer is suspended
pub const SUSPEND_QUEUE_LENGTH: usize = 256;

/// Operations every mode-specific engine provides
pub trait RlcEngine: Send {
    /// Queue an SDU from PDCP
    fn write_sdu(&mut self, sdu: RlcSdu) -> Result<(), LayerError>;

    /// Drop a queued SDU that was not yet segmented
    fn discard_sdu(&mut self, pdcp_sn: u32) -> bool;

    fn sdu_queue_is_full(&self) -> bool;

    fn has_data(&self) -> bool;

    /// Build a PDU of at most `nof_bytes`
    fn read_pdu(&mut self, nof_bytes: usize) -> Option<Bytes>;

    /// Process a PDU received from MAC
    fn write_pdu(&mut self, pdu: Bytes);

    /// Pending bytes, also reported through the BSR callback
    fn get_buffer_state(&self) -> BufferState;

    /// Back to the just-configured state
    fn reestablish(&mut self);

    fn stop(&mut self);

    fn empty_queue(&mut self);

    /// Advance all timers by 1 ms
    fn tick(&mut self);

    fn metrics(&self) -> RlcBearerMetrics;

    fn reset_metrics(&mut self);

    fn context_mut(&mut self) -> &mut RlcContext;
}

enum RlcEngineKind {
    Tm(RlcTm),
    UmLte(RlcUmLte),
    UmNr(RlcUmNr),
    AmLte(RlcAmLte),
    AmNr(RlcAmNr),
}

impl RlcEngineKind {
    fn build(ctx: RlcContext, cfg: &RlcConfig) -> Result<Self, LayerError> {
        let queue_len = cfg.tx_queue_length as usize;
        Ok(match (cfg.mode, cfg.rat) {
            (RlcMode::Tm, _) => Self::Tm(RlcTm::new(ctx, queue_len)),
            (RlcMode::Um, Rat::Lte) => Self::UmLte(RlcUmLte::new(ctx, &cfg.um_lte, queue_len)?),
            (RlcMode::Um, Rat::Nr) => Self::UmNr(RlcUmNr::new(ctx, &cfg.um_nr, queue_len)?),
            (RlcMode::Am, Rat::Lte) => Self::AmLte(RlcAmLte::new(ctx, &cfg.am_lte, queue_len)),
            (RlcMode::Am, Rat::Nr) => Self::AmNr(RlcAmNr::new(ctx, &cfg.am_nr, queue_len)?),
        })
    }

    fn get(&self) -> &dyn RlcEngine {
        match self {
            Self::Tm(e) => e,
            Self::UmLte(e) => e,
            Self::UmNr(e) => e,
            Self::AmLte(e) => e,
            Self::AmNr(e) => e,
        }
    }

    fn get_mut(&mut self) -> &mut dyn RlcEngine {
        match self {
            Self::Tm(e) => e,
            Self::UmLte(e) => e,
            Self::UmNr(e) => e,
            Self::AmLte(e) => e,
            Self::AmNr(e) => e,
        }
    }
}

pub struct RlcEntity {
    ctx: RlcContext,
    cfg: RlcConfig,
    engine: RlcEngineKind,
    suspended: bool,
    rx_pdu_resume_queue: VecDeque<Bytes>,
    tx_sdu_resume_queue: VecDeque<RlcSdu>,
}

impl RlcEntity {
    /// Create a bearer; the configuration is validated first
    pub fn new(ctx: RlcContext, cfg: RlcConfig) -> Result<Self, LayerError> {
        cfg.validate()?;
        let engine = RlcEngineKind::build(ctx.clone(), &cfg)?;
        Ok(Self {
            ctx,
            cfg,
            engine,
            suspended: false,
            rx_pdu_resume_queue: VecDeque::new(),
            tx_sdu_resume_queue: VecDeque::new(),
        })
    }

    /// Replace the configuration. On error the bearer keeps its previous state.
    pub fn configure(&mut self, cfg: RlcConfig) -> Result<(), LayerError> {
        cfg.validate()?;
        let engine = RlcEngineKind::build(self.ctx.clone(), &cfg)?;
        info!(
            "{}: reconfigured from {:?} to {:?}",
            self.ctx.rb_name, self.cfg.mode, cfg.mode
        );
        self.engine = engine;
        self.cfg = cfg;
        self.rx_pdu_resume_queue.clear();
        self.tx_sdu_resume_queue.clear();
        Ok(())
    }

    pub fn config(&self) -> &RlcConfig {
        &self.cfg
    }

    pub fn mode(&self) -> RlcMode {
        self.cfg.mode
    }

    pub fn lcid(&self) -> Lcid {
        self.ctx.lcid
    }

    pub fn rb_name(&self) -> &str {
        &self.ctx.rb_name
    }

    /// Move the bearer to another logical channel
    pub fn set_lcid(&mut self, lcid: Lcid) {
        self.ctx.lcid = lcid;
        self.ctx.rb_name = lcid.rb_name();
        let engine_ctx = self.engine.get_mut().context_mut();
        engine_ctx.lcid = lcid;
        engine_ctx.rb_name = lcid.rb_name();
    }

    pub fn set_bsr_callback(&mut self, callback: Option<BsrCallback>) {
        self.ctx.bsr_callback = callback.clone();
        self.engine.get_mut().context_mut().bsr_callback = callback;
    }

    /// Start holding traffic. Returns false if already suspended.
    pub fn suspend(&mut self) -> bool {
        if self.suspended {
            return false;
        }
        debug!("{}: suspended", self.ctx.rb_name);
        self.suspended = true;
        true
    }

    /// Replay held PDUs then held SDUs. Returns false if not suspended.
    pub fn resume(&mut self) -> bool {
        if !self.suspended {
            return false;
        }
        self.suspended = false;
        debug!(
            "{}: resumed, replaying {} PDUs and {} SDUs",
            self.ctx.rb_name,
            self.rx_pdu_resume_queue.len(),
            self.tx_sdu_resume_queue.len()
        );
        while let Some(pdu) = self.rx_pdu_resume_queue.pop_front() {
            self.engine.get_mut().write_pdu(pdu);
        }
        while let Some(sdu) = self.tx_sdu_resume_queue.pop_front() {
            if let Err(e) = self.engine.get_mut().write_sdu(sdu) {
                warn!("{}: held SDU dropped on resume: {}", self.ctx.rb_name, e);
            }
        }
        true
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn write_sdu(&mut self, sdu: RlcSdu) -> Result<(), LayerError> {
        if sdu.is_empty() {
            warn!("{}: dropping empty SDU", self.ctx.rb_name);
            return Err(LayerError::InvalidPdu);
        }
        let max = max_sdu_size(self.cfg.rat);
        if sdu.len() > max {
            warn!(
                "{}: dropping SDU of {} B, maximum is {} B",
                self.ctx.rb_name,
                sdu.len(),
                max
            );
            return Err(LayerError::SduTooLarge {
                size: sdu.len(),
                max,
            });
        }
        if self.suspended {
            if self.tx_sdu_resume_queue.len() >= SUSPEND_QUEUE_LENGTH {
                warn!("{}: suspended SDU queue full", self.ctx.rb_name);
                return Err(LayerError::QueueFull);
            }
            self.tx_sdu_resume_queue.push_back(sdu);
            return Ok(());
        }
        self.engine.get_mut().write_sdu(sdu)
    }

    pub fn write_pdu(&mut self, pdu: Bytes) {
        if self.suspended {
            if self.rx_pdu_resume_queue.len() >= SUSPEND_QUEUE_LENGTH {
                warn!(
                    "{}: suspended PDU queue full, dropping PDU ({} B)",
                    self.ctx.rb_name,
                    pdu.len()
                );
                return;
            }
            self.rx_pdu_resume_queue.push_back(pdu);
            return;
        }
        self.engine.get_mut().write_pdu(pdu);
    }

    pub fn read_pdu(&mut self, nof_bytes: usize) -> Option<Bytes> {
        if self.suspended {
            return None;
        }
        self.engine.get_mut().read_pdu(nof_bytes)
    }

    pub fn get_buffer_state(&self) -> BufferState {
        if self.suspended {
            return BufferState::default();
        }
        self.engine.get().get_buffer_state()
    }

    pub fn discard_sdu(&mut self, pdcp_sn: u32) -> bool {
        if let Some(pos) = self
            .tx_sdu_resume_queue
            .iter()
            .position(|sdu| sdu.pdcp_sn == pdcp_sn)
        {
            self.tx_sdu_resume_queue.remove(pos);
            return true;
        }
        self.engine.get_mut().discard_sdu(pdcp_sn)
    }

    pub fn sdu_queue_is_full(&self) -> bool {
        if self.suspended {
            return self.tx_sdu_resume_queue.len() >= SUSPEND_QUEUE_LENGTH;
        }
        self.engine.get().sdu_queue_is_full()
    }

    pub fn has_data(&self) -> bool {
        !self.suspended && self.engine.get().has_data()
    }

    pub fn reestablish(&mut self) {
        debug!("{}: reestablish", self.ctx.rb_name);
        self.rx_pdu_resume_queue.clear();
        self.tx_sdu_resume_queue.clear();
        self.engine.get_mut().reestablish();
    }

    pub fn stop(&mut self) {
        debug!("{}: stop", self.ctx.rb_name);
        self.rx_pdu_resume_queue.clear();
        self.tx_sdu_resume_queue.clear();
        self.engine.get_mut().stop();
    }

    pub fn empty_queue(&mut self) {
        self.tx_sdu_resume_queue.clear();
        self.engine.get_mut().empty_queue();
    }

    pub fn tick(&mut self) {
        self.engine.get_mut().tick();
    }

    pub fn metrics(&self) -> RlcBearerMetrics {
        self.engine.get().metrics()
    }

    pub fn reset_metrics(&mut self) {
        self.engine.get_mut().reset_metrics();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rlc::testing::{payload, test_context};
    use crate::rlc::MAX_SDU_SIZE_LTE;

    #[test]
    fn test_write_sdu_validation() {
        let (ctx, _, _) = test_context();
        let mut entity = RlcEntity::new(ctx, RlcConfig::default_drb_um(Rat::Lte, 10)).unwrap();
        assert_eq!(
            entity.write_sdu(RlcSdu::new(0, Bytes::new())),
            Err(LayerError::InvalidPdu)
        );
        assert_eq!(
            entity.write_sdu(RlcSdu::new(0, vec![0u8; MAX_SDU_SIZE_LTE + 1])),
            Err(LayerError::SduTooLarge {
                size: MAX_SDU_SIZE_LTE + 1,
                max: MAX_SDU_SIZE_LTE,
            })
        );
        assert!(entity.write_sdu(RlcSdu::new(0, payload(0, 10))).is_ok());
        assert!(entity.has_data());
    }

    #[test]
    fn test_suspend_holds_and_resume_replays() {
        let (ctx, pdcp, _) = test_context();
        let mut tx = RlcEntity::new(ctx.clone(), RlcConfig::tm(Rat::Nr)).unwrap();
        let mut rx = RlcEntity::new(ctx, RlcConfig::tm(Rat::Nr)).unwrap();

        assert!(tx.suspend());
        assert!(!tx.suspend());
        tx.write_sdu(RlcSdu::new(1, payload(0, 8))).unwrap();
        assert!(tx.read_pdu(100).is_none());
        assert!(tx.get_buffer_state().is_empty());

        assert!(rx.suspend());
        rx.write_pdu(payload(50, 4));
        assert!(pdcp.sdus().is_empty());

        assert!(rx.resume());
        assert_eq!(pdcp.sdus(), vec![payload(50, 4)]);

        assert!(tx.resume());
        assert!(!tx.resume());
        assert_eq!(tx.read_pdu(100), Some(payload(0, 8)));
    }

    #[test]
    fn test_suspend_queue_is_bounded() {
        let (ctx, _, _) = test_context();
        let mut entity = RlcEntity::new(ctx, RlcConfig::tm(Rat::Lte)).unwrap();
        entity.suspend();
        for i in 0..SUSPEND_QUEUE_LENGTH as u32 {
            entity.write_sdu(RlcSdu::new(i, payload(0, 1))).unwrap();
        }
        assert!(entity.sdu_queue_is_full());
        assert_eq!(
            entity.write_sdu(RlcSdu::new(999, payload(0, 1))),
            Err(LayerError::QueueFull)
        );
        assert!(entity.discard_sdu(3));
        assert!(!entity.sdu_queue_is_full());
    }

    #[test]
    fn test_configure_is_atomic() {
        let (ctx, _, _) = test_context();
        let mut entity = RlcEntity::new(ctx, RlcConfig::default_drb_am(Rat::Nr)).unwrap();
        entity.write_sdu(RlcSdu::new(0, payload(0, 10))).unwrap();

        let mut bad = RlcConfig::default_drb_um(Rat::Nr, 12);
        bad.um_nr.rx_sn_field_length = 6;
        assert!(matches!(
            entity.configure(bad),
            Err(LayerError::InvalidConfiguration(_))
        ));
        assert_eq!(entity.mode(), RlcMode::Am);
        assert!(entity.has_data());

        entity
            .configure(RlcConfig::default_drb_um(Rat::Nr, 12))
            .unwrap();
        assert_eq!(entity.mode(), RlcMode::Um);
        assert!(!entity.has_data());
    }

    #[test]
    fn test_set_lcid_renames_bearer() {
        let (ctx, _, _) = test_context();
        let mut entity = RlcEntity::new(ctx, RlcConfig::default_drb_am(Rat::Lte)).unwrap();
        entity.set_lcid(Lcid(4));
        assert_eq!(entity.lcid(), Lcid(4));
        assert_eq!(entity.rb_name(), Lcid(4).rb_name());
    }

    #[test]
    fn test_stop_then_reestablish() {
        let (ctx, _, _) = test_context();
        let mut entity = RlcEntity::new(ctx, RlcConfig::default_drb_um(Rat::Nr, 6)).unwrap();
        entity.stop();
        assert!(entity.write_sdu(RlcSdu::new(0, payload(0, 10))).is_err());
        entity.reestablish();
        assert!(entity.write_sdu(RlcSdu::new(0, payload(0, 10))).is_ok());
        assert!(entity.read_pdu(100).is_some());
    }
}
