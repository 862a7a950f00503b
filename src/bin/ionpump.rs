//! Feeds a single compressed frame to the hardware decoder at a fixed
//! cadence and pumps the decoded output through the ionvideo capture device,
//! recycling a small ring of ION-backed DMABUF buffers.

use anyhow::Context;
use clap::{App, Arg};
use log::{error, info, warn};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ionpump::clock::MonotonicClock;
use ionpump::codec;
use ionpump::codec::CodecConfig;
use ionpump::codec::CodecDevice;
use ionpump::codec::SyncFlags;
use ionpump::codec::VideoFormat;
use ionpump::feeder::FeedScheduler;
use ionpump::pool::{BufferPool, IonAllocator, ION_DEVICE};
use ionpump::pump::{FramePump, DEFAULT_POLL_INTERVAL};
use ionpump::queue::{CaptureFormat, CaptureQueue, IONVIDEO_DEVICE};
use ionpump::vfm::VfmMap;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = App::new("ionpump")
        .arg(
            Arg::with_name("device")
                .long("device")
                .takes_value(true)
                .default_value(IONVIDEO_DEVICE)
                .help("Path to the ionvideo capture device"),
        )
        .arg(
            Arg::with_name("ion")
                .long("ion")
                .takes_value(true)
                .default_value(ION_DEVICE)
                .help("Path to the ION allocator device"),
        )
        .arg(
            Arg::with_name("width")
                .long("width")
                .takes_value(true)
                .default_value("1280")
                .help("Frame width in pixels"),
        )
        .arg(
            Arg::with_name("height")
                .long("height")
                .takes_value(true)
                .default_value("720")
                .help("Frame height in pixels"),
        )
        .arg(
            Arg::with_name("fps")
                .long("fps")
                .takes_value(true)
                .default_value("60")
                .help("Target frame rate"),
        )
        .arg(
            Arg::with_name("buffers")
                .long("buffers")
                .takes_value(true)
                .default_value("8")
                .help("Number of capture buffers to allocate"),
        )
        .arg(
            Arg::with_name("FRAME")
                .required(true)
                .help("Path to the compressed MJPEG frame to loop"),
        )
        .get_matches();

    let device_path = matches.value_of("device").unwrap();
    let ion_path = matches.value_of("ion").unwrap();
    let width: u32 = matches
        .value_of("width")
        .unwrap()
        .parse()
        .context("invalid width")?;
    let height: u32 = matches
        .value_of("height")
        .unwrap()
        .parse()
        .context("invalid height")?;
    let fps: u32 = matches.value_of("fps").unwrap().parse().context("invalid fps")?;
    anyhow::ensure!(fps > 0, "fps must be positive");
    let num_buffers: u32 = matches
        .value_of("buffers")
        .unwrap()
        .parse()
        .context("invalid buffer count")?;
    let frame_path = matches.value_of("FRAME").unwrap();

    let payload: Arc<[u8]> = fs::read(frame_path)
        .with_context(|| format!("failed to read frame payload {}", frame_path))?
        .into();
    info!("frame payload: {} ({} bytes)", frame_path, payload.len());

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .context("failed to set Ctrl-C handler")?;
    }

    let clock = MonotonicClock::start();

    // Route the decoder output into the ionvideo sink before anything opens
    // the devices.
    let vfm = VfmMap::new();
    vfm.route_to_ionvideo()
        .context("failed to route VFM map to ionvideo")?;

    let session = Session {
        device: Path::new(device_path),
        ion: Path::new(ion_path),
        width,
        height,
        fps,
        num_buffers,
    };
    let result = run(&session, payload, Arc::clone(&stop), clock);

    if let Err(e) = vfm.restore_default() {
        warn!("failed to restore VFM map: {}", e);
    }

    result
}

struct Session<'a> {
    device: &'a Path,
    ion: &'a Path,
    width: u32,
    height: u32,
    fps: u32,
    num_buffers: u32,
}

fn run(
    session: &Session,
    payload: Arc<[u8]>,
    stop: Arc<AtomicBool>,
    clock: MonotonicClock,
) -> anyhow::Result<()> {
    let allocator = IonAllocator::open(session.ion)?;

    let mut queue = CaptureQueue::open(
        session.device,
        session.width,
        session.height,
        CaptureFormat::Nv12,
    )?;
    let frame_len = queue.frame_len();

    let granted = queue.request_buffers(session.num_buffers)?;
    if granted != session.num_buffers as usize {
        info!("driver granted {} of {} buffers", granted, session.num_buffers);
    }

    let pool = BufferPool::allocate(&allocator, granted, frame_len)?;
    for (index, buffer) in pool.iter().enumerate() {
        queue.submit(index, buffer.export_fd(), buffer.length() as u32)?;
    }

    queue.stream_on()?;

    codec::set_freerun(Path::new(codec::AMVIDEO_DEVICE), true)?;

    let config = CodecConfig {
        format: VideoFormat::Mjpeg,
        width: session.width,
        height: session.height,
        fps: session.fps,
        sync: SyncFlags::EXTERNAL_PTS | SyncFlags::SYNC_OUTSIDE,
    };
    let sink = CodecDevice::open(Path::new(codec::VIDEO_ES_DEVICE), &config)?;

    let interval = Duration::from_secs_f64(1.0 / session.fps as f64);
    let mut feeder = FeedScheduler::new(sink, payload, interval, Arc::clone(&stop), clock);

    let feeder_stop = Arc::clone(&stop);
    let feeder_thread = thread::spawn(move || {
        let result = feeder.run();
        if result.is_err() {
            // Bring the pump down with us.
            feeder_stop.store(true, Ordering::SeqCst);
        }
        (result, feeder.frames())
    });

    let mut pump = FramePump::new(queue, DEFAULT_POLL_INTERVAL, Arc::clone(&stop), clock);
    let pump_result = pump.run();

    // Teardown: stop the feeder first, then quiesce the capture side while
    // the buffer pool is still alive.
    stop.store(true, Ordering::SeqCst);
    match feeder_thread.join() {
        Ok((Ok(()), frames)) => info!("feeder stopped after {} frames", frames),
        Ok((Err(e), frames)) => error!("feeder failed after {} frames: {}", frames, e),
        Err(_) => error!("feeder thread panicked"),
    }

    info!("pumped {} frames", pump.frames());
    let mut queue = pump.into_source();
    if let Err(e) = queue.stream_off() {
        warn!("failed to stop capture stream: {}", e);
    }
    drop(queue);
    drop(pool);

    pump_result?;

    Ok(())
}
