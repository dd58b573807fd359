//! Multi-bearer RLC manager
//!
//! Owns every bearer of one peer keyed by LCID and routes PDCP, MAC and RRC
//! calls to them. SRB0 in TM exists from creation and after every reset.

use super::config::RlcConfig;
use super::entity::RlcEntity;
use super::metrics::RlcBearerMetrics;
use super::sdu_queue::RlcSdu;
use super::RlcContext;
use crate::LayerError;
use bytes::Bytes;
use common::types::{Lcid, Rat, MAX_RADIO_BEARERS};
use interfaces::{BsrCallback, BufferState, PdcpRlcInterface, RrcRlcInterface};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct Rlc {
    rat: Rat,
    pdcp: Arc<dyn PdcpRlcInterface>,
    rrc: Arc<dyn RrcRlcInterface>,
    bsr_callback: Option<BsrCallback>,
    bearers: BTreeMap<Lcid, RlcEntity>,
}

impl Rlc {
    pub fn new(rat: Rat, pdcp: Arc<dyn PdcpRlcInterface>, rrc: Arc<dyn RrcRlcInterface>) -> Self {
        let mut rlc = Self {
            rat,
            pdcp,
            rrc,
            bsr_callback: None,
            bearers: BTreeMap::new(),
        };
        rlc.add_default_bearer();
        rlc
    }

    fn add_default_bearer(&mut self) {
        if let Err(e) = self.add_bearer(Lcid::SRB0, RlcConfig::tm(self.rat)) {
            error!("Failed to add SRB0: {}", e);
        }
    }

    /// Register the MAC callback for buffer state reports on all bearers
    pub fn set_bsr_callback(&mut self, callback: BsrCallback) {
        for bearer in self.bearers.values_mut() {
            bearer.set_bsr_callback(Some(callback.clone()));
        }
        self.bsr_callback = Some(callback);
    }

    fn bearer(&self, lcid: Lcid) -> Result<&RlcEntity, LayerError> {
        self.bearers
            .get(&lcid)
            .ok_or(LayerError::BearerNotFound(lcid.value()))
    }

    fn bearer_mut(&mut self, lcid: Lcid) -> Result<&mut RlcEntity, LayerError> {
        self.bearers
            .get_mut(&lcid)
            .ok_or(LayerError::BearerNotFound(lcid.value()))
    }

    pub fn add_bearer(&mut self, lcid: Lcid, cfg: RlcConfig) -> Result<(), LayerError> {
        if lcid.value() >= MAX_RADIO_BEARERS {
            return Err(LayerError::InvalidConfiguration(format!(
                "LCID {} outside [0, {})",
                lcid, MAX_RADIO_BEARERS
            )));
        }
        if self.bearers.contains_key(&lcid) {
            warn!("LCID {} already exists", lcid);
            return Err(LayerError::BearerExists(lcid.value()));
        }
        let mut ctx = RlcContext::new(lcid, self.pdcp.clone(), self.rrc.clone());
        ctx.bsr_callback = self.bsr_callback.clone();
        let (rat, mode) = (cfg.rat, cfg.mode);
        let entity = RlcEntity::new(ctx, cfg)?;
        self.bearers.insert(lcid, entity);
        info!("Added {:?} radio bearer with LCID {} in {:?}", rat, lcid, mode);
        Ok(())
    }

    pub fn del_bearer(&mut self, lcid: Lcid) -> Result<(), LayerError> {
        let mut bearer = self.bearers.remove(&lcid).ok_or_else(|| {
            error!("Can't delete bearer with LCID {}, bearer doesn't exist", lcid);
            LayerError::BearerNotFound(lcid.value())
        })?;
        bearer.stop();
        info!("Deleted RLC bearer with LCID {}", lcid);
        Ok(())
    }

    /// Move a bearer to a free LCID, keeping its state
    pub fn change_lcid(&mut self, old_lcid: Lcid, new_lcid: Lcid) -> Result<(), LayerError> {
        if new_lcid.value() >= MAX_RADIO_BEARERS {
            return Err(LayerError::InvalidConfiguration(format!(
                "LCID {} outside [0, {})",
                new_lcid, MAX_RADIO_BEARERS
            )));
        }
        if self.bearers.contains_key(&new_lcid) {
            error!("Can't change LCID {} to {}, new LCID occupied", old_lcid, new_lcid);
            return Err(LayerError::BearerExists(new_lcid.value()));
        }
        let mut bearer = self
            .bearers
            .remove(&old_lcid)
            .ok_or(LayerError::BearerNotFound(old_lcid.value()))?;
        bearer.set_lcid(new_lcid);
        self.bearers.insert(new_lcid, bearer);
        info!("Changed LCID of RLC bearer from {} to {}", old_lcid, new_lcid);
        Ok(())
    }

    pub fn has_bearer(&self, lcid: Lcid) -> bool {
        self.bearers.contains_key(&lcid)
    }

    pub fn suspend_bearer(&mut self, lcid: Lcid) -> Result<(), LayerError> {
        if self.bearer_mut(lcid)?.suspend() {
            info!("Suspended radio bearer with LCID {}", lcid);
            Ok(())
        } else {
            Err(LayerError::InvalidState(format!(
                "bearer {} already suspended",
                lcid
            )))
        }
    }

    pub fn resume_bearer(&mut self, lcid: Lcid) -> Result<(), LayerError> {
        if self.bearer_mut(lcid)?.resume() {
            info!("Resumed radio bearer with LCID {}", lcid);
            Ok(())
        } else {
            Err(LayerError::InvalidState(format!(
                "bearer {} not suspended",
                lcid
            )))
        }
    }

    pub fn is_suspended(&self, lcid: Lcid) -> bool {
        self.bearers
            .get(&lcid)
            .map(RlcEntity::is_suspended)
            .unwrap_or(false)
    }

    pub fn reestablish(&mut self, lcid: Lcid) -> Result<(), LayerError> {
        info!("Reestablishing LCID {}", lcid);
        self.bearer_mut(lcid)?.reestablish();
        Ok(())
    }

    pub fn reestablish_all(&mut self) {
        info!("Reestablishing all bearers");
        for bearer in self.bearers.values_mut() {
            bearer.reestablish();
        }
    }

    /// Drop every bearer and start over with SRB0 only
    pub fn reset(&mut self) {
        for bearer in self.bearers.values_mut() {
            bearer.stop();
        }
        self.bearers.clear();
        self.add_default_bearer();
    }

    pub fn stop(&mut self) {
        for bearer in self.bearers.values_mut() {
            bearer.stop();
        }
    }

    pub fn empty_queue(&mut self) {
        for bearer in self.bearers.values_mut() {
            bearer.empty_queue();
        }
    }

    pub fn write_sdu(&mut self, lcid: Lcid, sdu: RlcSdu) -> Result<(), LayerError> {
        let bearer = self.bearers.get_mut(&lcid).ok_or_else(|| {
            warn!("RLC LCID {} doesn't exist, dropping SDU", lcid);
            LayerError::BearerNotFound(lcid.value())
        })?;
        let result = bearer.write_sdu(sdu);
        bearer.get_buffer_state();
        result
    }

    pub fn discard_sdu(&mut self, lcid: Lcid, pdcp_sn: u32) -> Result<bool, LayerError> {
        let bearer = self.bearer_mut(lcid)?;
        let discarded = bearer.discard_sdu(pdcp_sn);
        if !discarded {
            debug!("{}: PDCP SN {} not found in SDU queue", bearer.rb_name(), pdcp_sn);
        }
        bearer.get_buffer_state();
        Ok(discarded)
    }

    pub fn sdu_queue_is_full(&self, lcid: Lcid) -> bool {
        self.bearers
            .get(&lcid)
            .map(RlcEntity::sdu_queue_is_full)
            .unwrap_or(false)
    }

    pub fn has_data(&self, lcid: Lcid) -> bool {
        self.bearers
            .get(&lcid)
            .map(RlcEntity::has_data)
            .unwrap_or(false)
    }

    pub fn get_buffer_state(&self, lcid: Lcid) -> Result<BufferState, LayerError> {
        Ok(self.bearer(lcid)?.get_buffer_state())
    }

    pub fn read_pdu(&mut self, lcid: Lcid, nof_bytes: usize) -> Result<Option<Bytes>, LayerError> {
        let bearer = self.bearer_mut(lcid)?;
        let pdu = bearer.read_pdu(nof_bytes);
        bearer.get_buffer_state();
        Ok(pdu)
    }

    pub fn write_pdu(&mut self, lcid: Lcid, pdu: Bytes) -> Result<(), LayerError> {
        self.bearer_mut(lcid)?.write_pdu(pdu);
        Ok(())
    }

    /// Advance the timers of all bearers by 1 ms
    pub fn tick(&mut self) {
        for bearer in self.bearers.values_mut() {
            bearer.tick();
        }
    }

    /// Counters of every bearer since the previous call
    pub fn get_metrics(&mut self) -> BTreeMap<Lcid, RlcBearerMetrics> {
        let metrics = self
            .bearers
            .iter()
            .map(|(&lcid, bearer)| (lcid, bearer.metrics()))
            .collect();
        self.reset_metrics();
        metrics
    }

    pub fn reset_metrics(&mut self) {
        for bearer in self.bearers.values_mut() {
            bearer.reset_metrics();
        }
    }

    pub fn bearer_config(&self, lcid: Lcid) -> Option<&RlcConfig> {
        self.bearers.get(&lcid).map(RlcEntity::config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rlc::testing::{payload, PdcpRecorder, RrcRecorder};
    use common::types::RlcMode;
    use std::sync::Mutex;

    fn new_rlc() -> (Rlc, Arc<PdcpRecorder>) {
        let pdcp = Arc::new(PdcpRecorder::default());
        let rrc = Arc::new(RrcRecorder::default());
        (Rlc::new(Rat::Nr, pdcp.clone(), rrc), pdcp)
    }

    #[test]
    fn test_srb0_present_and_reset() {
        let (mut rlc, _) = new_rlc();
        assert!(rlc.has_bearer(Lcid::SRB0));
        assert_eq!(rlc.bearer_config(Lcid::SRB0).map(|c| c.mode), Some(RlcMode::Tm));

        rlc.add_bearer(Lcid(3), RlcConfig::default_drb_am(Rat::Nr))
            .unwrap();
        rlc.reset();
        assert!(rlc.has_bearer(Lcid::SRB0));
        assert!(!rlc.has_bearer(Lcid(3)));
    }

    #[test]
    fn test_add_bearer_errors() {
        let (mut rlc, _) = new_rlc();
        assert_eq!(
            rlc.add_bearer(Lcid::SRB0, RlcConfig::tm(Rat::Nr)),
            Err(LayerError::BearerExists(0))
        );
        assert!(matches!(
            rlc.add_bearer(Lcid(MAX_RADIO_BEARERS), RlcConfig::tm(Rat::Nr)),
            Err(LayerError::InvalidConfiguration(_))
        ));
        let mut bad = RlcConfig::default_drb_am(Rat::Nr);
        bad.am_nr.rx_sn_field_length = 18;
        assert!(rlc.add_bearer(Lcid(4), bad).is_err());
        assert!(!rlc.has_bearer(Lcid(4)));
        assert_eq!(rlc.del_bearer(Lcid(4)), Err(LayerError::BearerNotFound(4)));
    }

    #[test]
    fn test_loopback_between_two_stacks() {
        let (mut ue, _) = new_rlc();
        let (mut gnb, gnb_pdcp) = new_rlc();
        for rlc in [&mut ue, &mut gnb] {
            rlc.add_bearer(Lcid(3), RlcConfig::default_drb_um(Rat::Nr, 12))
                .unwrap();
        }
        ue.write_sdu(Lcid(3), RlcSdu::new(0, payload(0, 100))).unwrap();
        while let Some(pdu) = ue.read_pdu(Lcid(3), 40).unwrap() {
            gnb.write_pdu(Lcid(3), pdu).unwrap();
        }
        assert_eq!(gnb_pdcp.sdus(), vec![payload(0, 100)]);
        assert!(!ue.has_data(Lcid(3)));
    }

    #[test]
    fn test_change_lcid_keeps_state() {
        let (mut rlc, _) = new_rlc();
        rlc.add_bearer(Lcid(3), RlcConfig::default_drb_am(Rat::Lte))
            .unwrap();
        rlc.write_sdu(Lcid(3), RlcSdu::new(7, payload(0, 10))).unwrap();
        rlc.change_lcid(Lcid(3), Lcid(5)).unwrap();
        assert!(!rlc.has_bearer(Lcid(3)));
        assert!(rlc.has_data(Lcid(5)));
        assert_eq!(
            rlc.change_lcid(Lcid(5), Lcid::SRB0),
            Err(LayerError::BearerExists(0))
        );
    }

    #[test]
    fn test_bsr_callback_after_write_sdu() {
        let (mut rlc, _) = new_rlc();
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        rlc.set_bsr_callback(Arc::new(move |lcid, newtx, prio| {
            sink.lock().unwrap().push((lcid, newtx, prio));
        }));
        rlc.add_bearer(Lcid(3), RlcConfig::tm(Rat::Nr)).unwrap();
        rlc.write_sdu(Lcid(3), RlcSdu::new(0, payload(0, 10))).unwrap();
        assert_eq!(reports.lock().unwrap().last(), Some(&(Lcid(3), 10, 0)));
    }

    #[test]
    fn test_get_metrics_resets_counters() {
        let (mut rlc, _) = new_rlc();
        rlc.write_sdu(Lcid::SRB0, RlcSdu::unnumbered(payload(0, 10)))
            .unwrap();
        let metrics = rlc.get_metrics();
        assert_eq!(metrics[&Lcid::SRB0].num_tx_sdus, 1);
        assert_eq!(metrics[&Lcid::SRB0].num_tx_sdu_bytes, 10);
        assert_eq!(rlc.get_metrics()[&Lcid::SRB0], RlcBearerMetrics::default());
    }

    #[test]
    fn test_suspend_resume_bearer() {
        let (mut rlc, _) = new_rlc();
        rlc.suspend_bearer(Lcid::SRB0).unwrap();
        assert!(rlc.is_suspended(Lcid::SRB0));
        assert!(rlc.suspend_bearer(Lcid::SRB0).is_err());
        rlc.write_sdu(Lcid::SRB0, RlcSdu::unnumbered(payload(0, 5)))
            .unwrap();
        assert!(!rlc.has_data(Lcid::SRB0));
        rlc.resume_bearer(Lcid::SRB0).unwrap();
        assert!(rlc.has_data(Lcid::SRB0));
        assert!(rlc.resume_bearer(Lcid(9)).is_err());
    }
}
