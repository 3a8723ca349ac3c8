use clap::Parser;
use anyhow::Context;
use fern::colors::{Color, ColoredLevelConfig};
use log::{LevelFilter, info};

use pcxt_core::bus::Peripheral;
use pcxt_core::cpu::IdleProcessor;
use pcxt_core::dev::aspi::AspiCdrom;
use pcxt_core::dev::pktdrv::PacketDriver;
use pcxt_core::machine::Machine;
use pcxt_backend::audio::AudioSink;
use pcxt_backend::back::*;
use pcxt_backend::clock::HostClock;
use pcxt_backend::pacing::SteppingPolicy;
use pcxt_backend::sched::*;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

mod monitor;
mod net;
mod pcm;

use monitor::TextMonitor;
use net::{UdpTunnel, parse_mac};
use pcm::PcmDump;

#[derive(Parser, Debug)]
struct Args {
    /// How the CPU catches up with the wall clock (fixed, drop, float)
    #[clap(short, long, default_value = "fixed")]
    stepping: SteppingPolicy,
    /// Guest CPU frequency in Hz
    #[clap(short, long, default_value_t = pcxt_core::DEFAULT_FREQUENCY)]
    frequency: u64,
    /// Cycles executed per CPU step
    #[clap(short, long, default_value_t = 1000)]
    quantum: u64,
    /// ISO 9660 image to insert in the CD-ROM drive
    #[clap(short, long)]
    cdrom: Option<PathBuf>,
    /// Enable the network adapter, tunnelling frames to this UDP peer
    #[clap(long)]
    net_peer: Option<SocketAddr>,
    /// Local address of the network tunnel
    #[clap(long, default_value = "0.0.0.0:8086")]
    net_bind: SocketAddr,
    /// MAC address of the network adapter
    #[clap(long, default_value = "02:00:00:00:00:01")]
    mac: String,
    /// Frames rendered per second
    #[clap(long, default_value_t = 60)]
    render_hz: u32,
    /// Audio sample rate in Hz
    #[clap(long, default_value_t = 44_100)]
    sample_rate: u32,
    /// Audio buffer length in milliseconds
    #[clap(long, default_value_t = 10)]
    audio_latency: u32,
    /// Write generated audio to this file as raw 16-bit PCM
    #[clap(long)]
    pcm_dump: Option<PathBuf>,
    /// Dump guest memory to this file on exit
    #[clap(long)]
    dump_memory: Option<PathBuf>,
    /// Maximum log level
    #[clap(short, long, default_value = "info")]
    log_level: LevelFilter,
}

fn setup_logger(level: LevelFilter) -> anyhow::Result<()> {
    let colors = ColoredLevelConfig::new()
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);
    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!("[{} {}] {}", colors.color(record.level()), record.target(), message))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn build_devices(args: &Args) -> anyhow::Result<Vec<Box<dyn Peripheral>>> {
    let mut devices: Vec<Box<dyn Peripheral>> = vec![Box::new(AspiCdrom::new(args.cdrom.clone()))];
    if let Some(peer) = args.net_peer {
        let mac = parse_mac(&args.mac)?;
        let tunnel = UdpTunnel::new(args.net_bind, peer, mac)?;
        devices.push(Box::new(PacketDriver::new(Some(Box::new(tunnel)))));
    }
    Ok(devices)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logger(args.log_level)?;

    let mut machine = Machine::new(Box::new(IdleProcessor), args.frequency, build_devices(&args)?)
        .context("Failed to construct machine")?;
    machine.reset()?;

    let sink = match &args.pcm_dump {
        Some(path) => Some(Box::new(PcmDump::create(path)?) as Box<dyn AudioSink>),
        None => None,
    };
    let config = SchedulerConfig {
        policy: args.stepping,
        quantum: args.quantum,
        render_hz: args.render_hz,
        sample_rate: args.sample_rate,
        audio_latency_ms: args.audio_latency,
    };
    let sched = Scheduler::start(machine, config, Arc::new(HostClock::new()),
        Some(Box::new(TextMonitor::new())), sink)?;

    let shutdown = sched.shutdown_flag();
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || request_stop(&handler_flag))
        .context("Couldn't install Ctrl-C handler")?;
    info!(target: "MACHINE", "Running, press Ctrl-C to stop");

    while !should_stop(&shutdown) && sched.is_running() {
        thread::sleep(Duration::from_millis(50));
    }

    let machine = sched.stop()?;
    if let Some(path) = &args.dump_memory {
        machine.guest.mem.dump(path)?;
    }
    machine.destroy()?;
    info!(target: "MACHINE", "Shut down cleanly");
    Ok(())
}
