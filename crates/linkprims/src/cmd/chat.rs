use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use linkprims_link::{ConnectOptions, Link, LinkConfig, LinkError, TextProtocol};
use linkprims_transport::Role;
use tracing::{info, warn};

use crate::cmd::{ChatArgs, Stop, StopFlag};
use crate::exit::{link_error, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_stats, print_text, OutputFormat};

/// Largest batch printed per wakeup.
const RECEIVE_BATCH: usize = 64;

pub fn run(args: ChatArgs, format: OutputFormat) -> CliResult<i32> {
    let role = if args.server {
        Role::Server
    } else {
        Role::Client
    };
    let config = LinkConfig::default().with_timeout_period(Duration::from_millis(args.timeout_ms));
    let link = Arc::new(Link::tcp(socket_addr(&args.host, args.port), role, config));
    let period = Duration::from_millis(args.period_ms.max(1));

    let stop = StopFlag::new(args.deadline_ms);
    {
        let link = Arc::clone(&link);
        stop.install_ctrlc_handler(move || {
            let _ = link.disconnect();
        })?;
    }
    if let Some(ms) = args.deadline_ms {
        // A blocking connect only returns once the link stops trying.
        let link = Arc::clone(&link);
        let stop = stop.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(ms));
            if !link.is_connected() && stop.check().is_some() {
                let _ = link.disconnect();
            }
        });
    }

    let options = ConnectOptions::default()
        .blocking(!args.no_wait)
        .auto_reconnect(args.auto_reconnect)
        .tick_period(period);
    if let Err(err) = link.connect(options) {
        return finish(&link, &args, format, stop_code(&stop, err));
    }

    let input_done = Arc::new(AtomicBool::new(false));
    if !args.message.is_empty() {
        for message in &args.message {
            send_line(&link, message);
        }
        input_done.store(true, Ordering::SeqCst);
    } else if args.listen_only {
        input_done.store(true, Ordering::SeqCst);
    } else {
        spawn_stdin_reader(Arc::clone(&link), Arc::clone(&input_done));
    }

    let target = link.target().to_string();
    let mut received = 0usize;
    let mut seen_connected = link.is_connected();
    let code = loop {
        match stop.check() {
            Some(Stop::Interrupted) => break Ok(SUCCESS),
            Some(Stop::DeadlineExpired) => break Ok(TIMEOUT),
            None => {}
        }

        let want = match args.count {
            Some(count) => count.saturating_sub(received).min(RECEIVE_BATCH),
            None => RECEIVE_BATCH,
        };
        for message in link.receive_wait(want, stop.remaining(period)) {
            print_text(&message, &target, format);
            received += 1;
        }
        if args.count.is_some_and(|count| received >= count) {
            break Ok(SUCCESS);
        }

        let connected = link.is_connected();
        seen_connected |= connected;
        if !args.auto_reconnect {
            if seen_connected && !connected {
                info!(target = %target, "connection lost");
                break Ok(if args.count.is_some() { FAILURE } else { SUCCESS });
            }
            if !seen_connected && link.stats().connect_failures > 0 {
                break Err(link_error(
                    "connect failed",
                    LinkError::ConnectFailed(target.clone()),
                ));
            }
        }
        if args.count.is_none()
            && connected
            && input_done.load(Ordering::SeqCst)
            && link.pending_outbound() == 0
        {
            break Ok(SUCCESS);
        }
    };

    finish(&link, &args, format, code)
}

fn stop_code(stop: &StopFlag, err: LinkError) -> CliResult<i32> {
    match stop.check() {
        Some(Stop::Interrupted) => Ok(SUCCESS),
        Some(Stop::DeadlineExpired) => Ok(TIMEOUT),
        None => Err(link_error("connect failed", err)),
    }
}

fn finish(
    link: &Link<TextProtocol>,
    args: &ChatArgs,
    format: OutputFormat,
    code: CliResult<i32>,
) -> CliResult<i32> {
    let teardown = link.disconnect();
    if args.stats {
        print_stats(&link.status(), &link.stats(), link.target(), format);
    }
    let code = code?;
    teardown.map_err(|err| link_error("disconnect failed", err))?;
    Ok(code)
}

fn spawn_stdin_reader(link: Arc<Link<TextProtocol>>, done: Arc<AtomicBool>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => send_line(&link, &line),
                Err(err) => {
                    warn!(error = %err, "stdin read failed");
                    break;
                }
            }
        }
        done.store(true, Ordering::SeqCst);
    });
}

fn send_line(link: &Link<TextProtocol>, line: &str) {
    let line = line.trim_end_matches('\r');
    if let Err(err) = link.send(line.to_string()) {
        warn!(error = %err, "message not sent");
    }
}

/// `host:port`, bracketing bare IPv6 literals.
fn socket_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
