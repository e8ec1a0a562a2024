//! Kestrel host simulator
//!
//! Runs a small control application on the Kestrel core without hardware:
//! a PID loop, a telemetry stream and the packet protocol, talking over an
//! in-memory link to a simulated host that sends setpoints.
//!
//! Usage: `kestrel-sim [config.toml]`. Without a path the embedded
//! `sim.toml` is used.

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use kestrel_core::os::{OsQueue, OsScheduler, OsWaitCondition};
use kestrel_core::{Context, Queue, Scheduler, SchedulerStats, ThreadConfig};
use kestrel_hal::ErrorCode;
use kestrel_hal_host::{MemoryLink, SimClock, StdClock};
use kestrel_protocol::{
    BinaryMessageDispatcher, ComProtocol, FrameBuffer, PacketFrameHandler, ProtocolStats,
    RawFrameHandler,
};
use log::{error, info, warn};

use crate::config::{Model, SimConfig};
use crate::node::{SetpointHandler, Status};
use crate::peer::{Peer, PeerStats};
use crate::pid::ControlLoop;

mod config;
mod logger;
mod node;
mod peer;
mod pid;

/// Thread table size of the cooperative scheduler
const MAX_THREADS: usize = 8;

/// Receive buffer of the device-side protocol
const RX_BUFFER_SIZE: usize = 1024;

/// Samples buffered between the controller and telemetry threads
const SAMPLE_QUEUE_DEPTH: usize = 16;

/// What a run produced
#[derive(Debug, Clone, Copy)]
struct SimReport {
    scheduler: Option<SchedulerStats>,
    protocol: ProtocolStats,
    peer: PeerStats,
    measurement: f32,
}

fn main() -> ExitCode {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = match SimConfig::load(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("kestrel-sim: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Level was checked when the config was validated
    let level = config.log_level().unwrap_or(log::LevelFilter::Info);
    if let Err(e) = logger::init(level) {
        eprintln!("kestrel-sim: cannot install logger: {e}");
    }

    info!(
        "kestrel-sim starting: {:?} model, {} ms",
        config.scheduler.model, config.scheduler.duration_ms
    );

    let result = match config.scheduler.model {
        Model::Cooperative => run_cooperative(&config),
        Model::Os => run_os(&config),
    };

    match result {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(ErrorCode::Resource) => {
            // No threads means no system to run; nothing sensible is left
            error!("cannot create threads, aborting");
            std::process::abort();
        }
        Err(e) => {
            error!("simulation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Single-threaded run on a simulated clock
fn run_cooperative(config: &SimConfig) -> Result<SimReport, ErrorCode> {
    let clock = SimClock::new();
    let (device_link, host_link) = MemoryLink::pair_with_capacity(config.link.capacity);

    let setpoint = Cell::new(config.controller.initial_setpoint());
    let status = Cell::new(Status::default());
    let samples: Queue<CriticalSectionRawMutex, Status, SAMPLE_QUEUE_DEPTH> = Queue::new();

    let mut setpoint_handler = SetpointHandler::new(&setpoint);
    let mut dispatcher: BinaryMessageDispatcher<'_, 4> = BinaryMessageDispatcher::new();
    dispatcher.register(&mut setpoint_handler)?;
    let handler = PacketFrameHandler::with_config(dispatcher, config.link.packet);
    let protocol: RefCell<ComProtocol<_, _, RX_BUFFER_SIZE>> =
        RefCell::new(ComProtocol::new(device_link, handler));
    let peer = RefCell::new(Peer::new(host_link, &config.controller));

    let mut control = ControlLoop::new(&config.controller);
    let mut controller = |_: &mut Context<'_>| {
        let target = setpoint.get();
        let measurement = control.step(target);
        let sample = Status {
            setpoint: target,
            measurement,
            output: control.output(),
        };
        status.set(sample);
        if config.telemetry.enabled && samples.enqueue(sample).is_err() {
            warn!("sample queue full, sample dropped");
        }
    };

    // Reports only the newest of the samples queued since the last run
    let mut telemetry = |_: &mut Context<'_>| {
        let mut newest = None;
        while let Some(sample) = samples.dequeue() {
            newest = Some(sample);
        }
        let Some(sample) = newest else {
            return;
        };
        let sent = sample
            .to_message()
            .map_err(ErrorCode::from)
            .and_then(|message| protocol.borrow_mut().send(&message));
        if let Err(e) = sent {
            warn!("telemetry not sent: {}", e);
        }
    };

    let mut link_poll = |_: &mut Context<'_>| {
        if let Err(e) = protocol.borrow_mut().poll() {
            warn!("link poll failed: {}", e);
        }
    };

    let mut host = |ctx: &mut Context<'_>| {
        if let Err(e) = peer.borrow_mut().step(ctx.now_ms()) {
            warn!("host step failed: {}", e);
        }
    };

    let mut scheduler: Scheduler<'_, SimClock, MAX_THREADS> =
        Scheduler::with_config(clock, config.scheduler.core());
    scheduler.add_thread(config.controller.thread(), &mut controller)?;
    scheduler.add_thread(config.telemetry.thread(), &mut telemetry)?;
    scheduler.add_thread(
        ThreadConfig::periodic(config.link.poll_period_ms),
        &mut link_poll,
    )?;
    scheduler.add_thread(
        ThreadConfig::periodic(config.link.peer_period_ms),
        &mut host,
    )?;

    scheduler.run_for(config.scheduler.duration_ms);
    let stats = scheduler.stats();
    drop(scheduler);

    let report = SimReport {
        scheduler: Some(stats),
        protocol: protocol.borrow().stats(),
        peer: peer.borrow().stats(),
        measurement: status.get().measurement,
    };
    Ok(report)
}

/// Native threads in real time
///
/// The controller hands samples to the telemetry thread through a queue;
/// the host thread reads the link whenever telemetry signals a send. The
/// device holds its first setpoint: host commands arrive but go unhandled.
fn run_os(config: &SimConfig) -> Result<SimReport, ErrorCode> {
    let (device_link, host_link) = MemoryLink::pair_with_capacity(config.link.capacity);
    let samples: Arc<OsQueue<Status, SAMPLE_QUEUE_DEPTH>> = Arc::new(OsQueue::new());
    let sent = Arc::new(OsWaitCondition::new());
    let latest = Arc::new(Mutex::new(Status::default()));

    // This device only talks; anything the host sends is left unhandled
    let handler = PacketFrameHandler::with_config(
        RawFrameHandler::new(|_: &[u8], _: &mut FrameBuffer| false),
        config.link.packet,
    );
    let protocol: Arc<Mutex<ComProtocol<_, _, RX_BUFFER_SIZE>>> =
        Arc::new(Mutex::new(ComProtocol::new(device_link, handler)));
    let peer = Arc::new(Mutex::new(Peer::new(host_link, &config.controller)));

    let mut scheduler = OsScheduler::with_config(StdClock::new(), config.scheduler.core());

    let mut control = ControlLoop::new(&config.controller);
    let target = config.controller.initial_setpoint();
    let queue = samples.clone();
    let snapshot = latest.clone();
    scheduler.add_thread(config.controller.thread(), move |_| {
        let measurement = control.step(target);
        let status = Status {
            setpoint: target,
            measurement,
            output: control.output(),
        };
        *snapshot.lock().unwrap_or_else(PoisonError::into_inner) = status;
        if queue.enqueue(status).is_err() {
            warn!("sample queue full, sample dropped");
        }
    })?;

    let queue = samples.clone();
    let link = protocol.clone();
    let signal = sent.clone();
    scheduler.add_thread(ThreadConfig::aperiodic(), move |_| {
        // None once the queue is cleared for shutdown
        let Some(status) = queue.dequeue_blocking() else {
            return;
        };
        let result = status
            .to_message()
            .map_err(ErrorCode::from)
            .and_then(|message| {
                link.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .send(&message)
            });
        match result {
            Ok(()) => signal.signal(),
            Err(e) => warn!("telemetry not sent: {}", e),
        }
    })?;

    let host = peer.clone();
    let signal = sent.clone();
    scheduler.add_thread(
        ThreadConfig::periodic(config.link.peer_period_ms),
        move |ctx| {
            if !signal.try_wait() {
                return;
            }
            let now = ctx.now_ms();
            if let Err(e) = host.lock().unwrap_or_else(PoisonError::into_inner).step(now) {
                warn!("host step failed: {}", e);
            }
        },
    )?;

    scheduler.start()?;
    std::thread::sleep(Duration::from_millis(u64::from(config.scheduler.duration_ms)));
    scheduler.shutdown_waking(|| samples.clear());

    let protocol_stats = protocol
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .stats();
    let peer_stats = peer.lock().unwrap_or_else(PoisonError::into_inner).stats();
    let measurement = latest
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .measurement;

    Ok(SimReport {
        scheduler: None,
        protocol: protocol_stats,
        peer: peer_stats,
        measurement,
    })
}

fn print_report(report: &SimReport) {
    if let Some(stats) = report.scheduler {
        info!(
            "scheduler: {} passes, {} runs, {} idles",
            stats.passes, stats.runs, stats.idles
        );
    }
    let p = &report.protocol;
    info!(
        "device: {} bytes in, {} frames found, {} invalid, {} unsupported, {} sent, {} tx errors, {} overflows",
        p.bytes_received,
        p.frames_found,
        p.frames_invalid,
        p.frames_unsupported,
        p.frames_sent,
        p.transmit_errors,
        p.overflows
    );
    let h = &report.peer;
    info!(
        "host: {} commands, {} acks, {} status reports, {} sequence gaps, {} bytes discarded",
        h.commands_sent, h.acks, h.status_reports, h.gaps, h.discarded
    );
    if h.unknown > 0 {
        warn!("host: {} messages not understood", h.unknown);
    }
    match h.last_status {
        Some(status) => info!(
            "last status: setpoint {:.2}, measurement {:.2}, output {:.2}",
            status.setpoint, status.measurement, status.output
        ),
        None => warn!("host never received a status report"),
    }
    info!("final measurement {:.3}", report.measurement);
}
