//! RLC loopback simulator
//!
//! Runs two RLC stacks (UE and gNB side) on their own tasks and moves PDUs
//! between them over a lossy channel, one MAC grant per bearer and direction
//! every simulated millisecond. Prints the bearer metrics as JSON at the end.

mod channel;
mod config;
mod peer;

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use common::types::{Lcid, Rat};
use interfaces::MacRlcInterface;
use layers::rlc::{Rlc, RlcBearerMetrics, RlcHandle, RlcSdu, RlcTask};
use layers::LayerError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use channel::{ChannelStats, LossyChannel};
use config::{BearerConfig, SimConfig};
use peer::{PdcpSink, PdcpSinkStats, RrcSink};

/// RLC loopback simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML or TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Simulated time in ms
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Probability of losing a PDU (0.0 - 1.0)
    #[arg(long)]
    loss_rate: Option<f64>,

    /// MAC grant per bearer and direction in bytes
    #[arg(long)]
    grant_size: Option<usize>,

    /// SDU size in bytes
    #[arg(long)]
    sdu_size: Option<usize>,

    /// Seed of the loss process
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn apply(&self, config: &mut SimConfig) {
        if let Some(duration_ms) = self.duration_ms {
            config.sim.duration_ms = duration_ms;
        }
        if let Some(loss_rate) = self.loss_rate {
            config.sim.loss_rate = loss_rate;
        }
        if let Some(grant_size) = self.grant_size {
            config.sim.grant_size = grant_size;
        }
        if let Some(sdu_size) = self.sdu_size {
            config.sim.sdu_size = sdu_size;
        }
        if self.seed.is_some() {
            config.sim.seed = self.seed;
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
    }
}

/// One side of the link
struct Peer {
    name: &'static str,
    handle: RlcHandle,
    join: JoinHandle<()>,
    pdcp: Arc<PdcpSink>,
    rrc: Arc<RrcSink>,
}

impl Peer {
    async fn start(name: &'static str, rat: Rat, bearers: &[BearerConfig]) -> Result<Self> {
        let pdcp = Arc::new(PdcpSink::new(name));
        let rrc = Arc::new(RrcSink::new(name));
        let rlc = Rlc::new(rat, pdcp.clone(), rrc.clone());
        // Timers advance with simulated time
        let (handle, join) = RlcTask::spawn_with_tick(rlc, None);
        for bearer in bearers {
            handle
                .add_bearer(Lcid(bearer.lcid), bearer.rlc.clone())
                .await?;
        }
        info!("{}: {} bearers configured", name, bearers.len());
        Ok(Self {
            name,
            handle,
            join,
            pdcp,
            rrc,
        })
    }

    async fn report(&self) -> Result<PeerReport> {
        let bearers = self
            .handle
            .get_metrics()
            .await?
            .into_iter()
            .map(|(lcid, metrics)| (lcid.rb_name(), metrics))
            .collect();
        Ok(PeerReport {
            pdcp: self.pdcp.stats(),
            radio_link_failures: self.rrc.radio_link_failures(),
            bearers,
        })
    }
}

#[derive(Serialize)]
struct PeerReport {
    pdcp: PdcpSinkStats,
    radio_link_failures: u64,
    bearers: BTreeMap<String, RlcBearerMetrics>,
}

#[derive(Serialize)]
struct Report {
    simulated_ms: u64,
    uplink: ChannelStats,
    downlink: ChannelStats,
    ue: PeerReport,
    gnb: PeerReport,
}

/// Pull PDUs from `from` until the grant is used up and push the survivors into `to`
async fn transfer(
    from: &Peer,
    to: &Peer,
    lcid: Lcid,
    grant_size: usize,
    channel: &mut LossyChannel,
) -> Result<()> {
    let mut budget = grant_size;
    while budget > 0 {
        let Some(pdu) = MacRlcInterface::read_pdu(&from.handle, lcid, budget).await? else {
            break;
        };
        if pdu.is_empty() {
            break;
        }
        budget = budget.saturating_sub(pdu.len());
        if channel.pass() {
            MacRlcInterface::write_pdu(&to.handle, lcid, pdu).await?;
        } else {
            debug!("{} -> {}: PDU on LCID {} lost", from.name, to.name, lcid);
        }
    }
    Ok(())
}

async fn offer_sdu(peer: &Peer, lcid: Lcid, sdu: RlcSdu) -> Result<()> {
    match peer.handle.write_sdu(lcid, sdu).await {
        Ok(()) => Ok(()),
        Err(LayerError::QueueFull) => {
            debug!("{}: SDU queue of LCID {} full", peer.name, lcid);
            Ok(())
        }
        Err(LayerError::ChannelClosed) => Err(LayerError::ChannelClosed.into()),
        Err(e) => {
            warn!("{}: SDU rejected on LCID {}: {}", peer.name, lcid, e);
            Ok(())
        }
    }
}

async fn run_loopback(
    config: &SimConfig,
    ue: &Peer,
    gnb: &Peer,
    uplink: &mut LossyChannel,
    downlink: &mut LossyChannel,
    elapsed_ms: &mut u64,
) -> Result<()> {
    let lcids: Vec<Lcid> = config.bearers().iter().map(|b| Lcid(b.lcid)).collect();
    let mut next_pdcp_sn = 0u32;

    for tti in 0..config.sim.duration_ms {
        ue.handle.tick().await?;
        gnb.handle.tick().await?;

        if tti % config.sim.sdu_interval_ms == 0 {
            for &lcid in &lcids {
                let payload = Bytes::from(vec![next_pdcp_sn as u8; config.sim.sdu_size]);
                offer_sdu(ue, lcid, RlcSdu::new(next_pdcp_sn, payload.clone())).await?;
                offer_sdu(gnb, lcid, RlcSdu::new(next_pdcp_sn, payload)).await?;
                next_pdcp_sn = next_pdcp_sn.wrapping_add(1);
            }
        }

        for &lcid in &lcids {
            transfer(ue, gnb, lcid, config.sim.grant_size, uplink).await?;
            transfer(gnb, ue, lcid, config.sim.grant_size, downlink).await?;
        }
        *elapsed_ms = tti + 1;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SimConfig::from_file(path)?,
        None => SimConfig::default(),
    };
    args.apply(&mut config);

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    config.validate()?;
    let bearers = config.bearers();
    let rat = bearers.first().map(|b| b.rlc.rat).unwrap_or(Rat::Nr);

    info!("Starting RLC loopback");
    info!("  Duration: {} ms", config.sim.duration_ms);
    info!("  SDU: {} B every {} ms", config.sim.sdu_size, config.sim.sdu_interval_ms);
    info!("  Grant: {} B", config.sim.grant_size);
    info!("  Loss rate: {}", config.sim.loss_rate);

    let ue = Peer::start("UE", rat, &bearers).await?;
    let gnb = Peer::start("gNB", rat, &bearers).await?;

    let mut uplink = LossyChannel::new(config.sim.loss_rate, config.sim.seed);
    let mut downlink = LossyChannel::new(
        config.sim.loss_rate,
        config.sim.seed.map(|s| s.wrapping_add(1)),
    );
    let mut elapsed_ms = 0;

    tokio::select! {
        result = run_loopback(&config, &ue, &gnb, &mut uplink, &mut downlink, &mut elapsed_ms) => {
            result?;
            info!("Simulation finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    let report = Report {
        simulated_ms: elapsed_ms,
        uplink: uplink.stats(),
        downlink: downlink.stats(),
        ue: ue.report().await?,
        gnb: gnb.report().await?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    // Shutdown
    for peer in [ue, gnb] {
        if let Err(e) = peer.handle.shutdown().await {
            warn!("{}: shutdown failed: {}", peer.name, e);
        }
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), peer.join).await;
    }

    info!("RLC loopback complete");
    Ok(())
}
