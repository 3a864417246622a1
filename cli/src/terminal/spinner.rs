use std::io;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use colored::*;
use console::Term;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use sweepr_core::telemetry::ProgressSnapshot;

use crate::terminal::colors;

const TICK: Duration = Duration::from_millis(100);
const TIP_DURATION: Duration = Duration::from_secs(3);
const MESSAGE_READ_TIME: Duration = Duration::from_secs(1);
const MIN_TIP_VISIBILITY: Duration = Duration::from_millis(750);
const TIPS: &[&str] = &[
    "Press Ctrl-C to stop early and keep what was found",
    "Use --deadline to cap how long a scan may run",
];

pub struct SpinnerHandle {
    pub spinner: ProgressBar,
    tx: Sender<String>,
    active: AtomicBool,
}

impl SpinnerHandle {
    pub fn send_to_queue(&self, message: String) {
        let _ = self.tx.send(message);
    }

    pub fn println(&self, msg: &str) {
        self.spinner.println(msg);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Shows the spinner on stderr with `msg` until [`SpinnerHandle::stop`].
    pub fn start(&self, msg: &str) {
        self.spinner.set_draw_target(ProgressDrawTarget::stderr());
        self.spinner.set_message(msg.to_string());
        self.spinner.enable_steady_tick(TICK);
        self.active.store(true, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::Relaxed);
        self.spinner.finish_and_clear();
    }
}

pub(crate) static SPINNER: OnceLock<SpinnerHandle> = OnceLock::new();

pub fn get_spinner() -> &'static SpinnerHandle {
    SPINNER.get_or_init(init_spinner)
}

fn init_spinner() -> SpinnerHandle {
    let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden());
    let style = ProgressStyle::with_template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&[
            "▁▁▁▁▁",
            "▁▂▂▂▁",
            "▁▄▂▄▁",
            "▂▄▆▄▂",
            "▄▆█▆▄",
            "▂▄▆▄▂",
            "▁▄▂▄▁",
            "▁▂▂▂▁",
        ]);
    pb.set_style(style);

    let (tx, rx) = mpsc::channel::<String>();
    let pb_clone = pb.clone();

    // Alternates the latest progress message with tips until the bar finishes.
    thread::spawn(move || {
        let mut tip_index = 0;
        let mut next_action_time = Instant::now() + TIP_DURATION;
        let mut is_showing_tip = false;
        let mut last_tip_time = Instant::now();

        loop {
            if pb_clone.is_finished() {
                break;
            }

            let wait_time = next_action_time.saturating_duration_since(Instant::now());

            match rx.recv_timeout(wait_time) {
                Ok(mut msg) => {
                    if is_showing_tip {
                        let elapsed = last_tip_time.elapsed();
                        if elapsed < MIN_TIP_VISIBILITY {
                            thread::sleep(MIN_TIP_VISIBILITY - elapsed);
                        }
                        is_showing_tip = false;
                    }
                    while let Ok(newer_msg) = rx.try_recv() {
                        msg = newer_msg;
                    }
                    pb_clone.set_message(msg);
                    next_action_time = Instant::now() + MESSAGE_READ_TIME;
                }
                Err(RecvTimeoutError::Timeout) => {
                    let tip = TIPS[tip_index % TIPS.len()];
                    pb_clone.set_message(format!("{}", tip.italic().white()));

                    tip_index += 1;
                    is_showing_tip = true;
                    last_tip_time = Instant::now();

                    next_action_time = Instant::now() + TIP_DURATION;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    break;
                }
            }
        }
    });

    SpinnerHandle {
        spinner: pb,
        tx,
        active: AtomicBool::new(false),
    }
}

pub fn report_scan_progress(progress: ProgressSnapshot) {
    let probed = format!("{}/{}", progress.probed, progress.enumerated);
    get_spinner().send_to_queue(
        format!(
            "Scanning Network: {} probed, {} alive, {} scanned, {} remaining",
            probed.bold(),
            progress.alive.to_string().green().bold(),
            progress.scanned.to_string().bold(),
            progress.remaining.to_string().color(colors::MUTED)
        )
        .color(colors::TEXT_DEFAULT)
        .to_string(),
    );
}

/// Log sink that keeps lines above the spinner while it runs.
pub struct SpinnerWriter;

impl io::Write for SpinnerWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let msg = String::from_utf8_lossy(buf);
        let msg = msg.trim_end();
        let spinner = get_spinner();
        if spinner.is_active() {
            spinner.println(msg);
        } else {
            Term::stdout().write_line(msg)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
