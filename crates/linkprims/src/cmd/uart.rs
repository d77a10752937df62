use std::thread;
use std::time::{Duration, Instant};

use linkprims_frame::BinaryMessage;
use linkprims_link::{ConnectOptions, DriveMode, Link, LinkConfig, LinkError};
use tracing::{debug, info};

use crate::cmd::{Stop, StopFlag, UartArgs};
use crate::exit::{frame_error, link_error, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_stats, print_values, OutputFormat};

/// Drives the serial link from this thread (manual mode), sending the test
/// message on a fixed interval and printing every frame that decodes.
pub fn run(args: UartArgs, format: OutputFormat) -> CliResult<i32> {
    let message = BinaryMessage::new(args.header, args.values.clone())
        .map_err(|err| frame_error("invalid test message", err))?;

    let config = LinkConfig::default()
        .with_drive_mode(DriveMode::Manual)
        .with_timeout_period(Duration::from_millis(args.timeout_ms));
    let link = Link::serial(&args.port, args.baud, config)
        .map_err(|err| link_error("invalid serial settings", err))?;

    let stop = StopFlag::new(args.deadline_ms);
    stop.install_ctrlc_handler(|| {})?;

    let code = drive(&link, &args, &message, &stop, format);
    let teardown = link.disconnect();
    if args.stats {
        print_stats(&link.status(), &link.stats(), link.target(), format);
    }
    let code = code?;
    teardown.map_err(|err| link_error("disconnect failed", err))?;
    Ok(code)
}

fn drive(
    link: &Link<linkprims_link::BinaryProtocol>,
    args: &UartArgs,
    message: &BinaryMessage,
    stop: &StopFlag,
    format: OutputFormat,
) -> CliResult<i32> {
    let period = Duration::from_millis(args.period_ms.max(1));
    let interval = Duration::from_millis(args.interval_ms);

    link.connect(ConnectOptions::default().auto_reconnect(args.auto_reconnect))
        .map_err(|err| link_error("open failed", err))?;

    let mut was_connected = false;
    let mut last_send: Option<Instant> = None;
    let mut sent_once = false;
    let mut received = 0usize;

    loop {
        match stop.check() {
            Some(Stop::Interrupted) => return Ok(SUCCESS),
            Some(Stop::DeadlineExpired) => return Ok(TIMEOUT),
            None => {}
        }

        link.update()
            .map_err(|err| link_error("serial update failed", err))?;

        let connected = link.is_connected();
        if connected && !was_connected {
            info!(port = %link.target(), baud = args.baud, "serial port open");
            if args.flush {
                match link.flush_incoming() {
                    Ok(discarded) => debug!(discarded, "line flushed"),
                    // Lost while flushing; the next update reopens or gives up.
                    Err(LinkError::NotConnected) => {}
                    Err(err) => return Err(link_error("flush failed", err)),
                }
            }
        }
        if !connected && was_connected {
            info!(port = %link.target(), "serial port lost");
        }
        was_connected = connected;

        if !connected && !args.auto_reconnect && link.stats().connect_failures > 0 {
            return Err(link_error(
                "open failed",
                LinkError::ConnectFailed(link.target().to_string()),
            ));
        }

        if connected && due(last_send, interval, sent_once) {
            link.send(message.clone())
                .map_err(|err| link_error("send failed", err))?;
            last_send = Some(Instant::now());
            sent_once = true;
        }

        for frame in link.receive_all() {
            print_values(&frame, link.target(), format);
            received += 1;
            if args.count.is_some_and(|count| received >= count) {
                return Ok(SUCCESS);
            }
        }

        thread::sleep(stop.remaining(period));
    }
}

/// True when the test message should go out. An interval of zero sends once.
fn due(last_send: Option<Instant>, interval: Duration, sent_once: bool) -> bool {
    if interval.is_zero() {
        return !sent_once;
    }
    match last_send {
        Some(at) => at.elapsed() >= interval,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_sends_once() {
        assert!(due(None, Duration::ZERO, false));
        assert!(!due(Some(Instant::now()), Duration::ZERO, true));
    }

    #[test]
    fn interval_gates_repeat_sends() {
        assert!(due(None, Duration::from_secs(1), false));
        assert!(!due(Some(Instant::now()), Duration::from_secs(60), true));
        let long_ago = Instant::now() - Duration::from_millis(20);
        assert!(due(Some(long_ago), Duration::from_millis(10), true));
    }
}
