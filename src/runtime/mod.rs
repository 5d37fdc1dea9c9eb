//! Single-threaded, readiness-based reactor driving the scan. One
//! `mio::Poll` instance, one OS thread, no locks: every handler below
//! runs to completion before the next is invoked, so `Counters`, the
//! task registry, and every task's buffer are mutated without
//! synchronization.

pub mod fd_limit;
pub mod feeder;
pub mod registry;
pub mod status;
pub mod task;

use crate::config::{expand_template, Config};
use crate::counters::Counters;
use crate::emitter::Emitter;
use feeder::Feeder;
use mio::net::TcpStream;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use registry::TaskRegistry;
use status::StatusReporter;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr};
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};
use task::{PendingSend, Phase, Task};
use tracing::{debug, info, warn};

/// Reserved token for stdin readiness: a sentinel index outside the
/// slab's range so it can never collide with a task token.
const STDIN_TOKEN: Token = Token(usize::MAX);

/// Runs the scan to completion. Returns once input is drained and every
/// admitted task has reached `Phase::Terminal` (spec invariant 4).
pub fn run(config: &Config) -> io::Result<()> {
    set_stdin_nonblocking()?;

    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(1024);
    let stdin_fd: RawFd = 0;
    poll.registry()
        .register(&mut SourceFd(&stdin_fd), STDIN_TOKEN, Interest::READABLE)?;

    let mut registry = TaskRegistry::new();
    let mut feeder = Feeder::new();
    let mut counters = Counters::new();
    let emitter = Emitter::new(config.format, config.port);
    let mut status = StatusReporter::new(Instant::now());

    poke(&mut feeder, &mut registry, &poll, config, &mut counters);

    loop {
        let now = Instant::now();
        let timeout = next_wakeup(&registry, &status, now);
        poll.poll(&mut events, Some(timeout))?;
        let now = Instant::now();

        for event in events.iter() {
            match event.token() {
                STDIN_TOKEN => {
                    handle_stdin_readable(&mut feeder)?;
                    poke(&mut feeder, &mut registry, &poll, config, &mut counters);
                }
                Token(token) => handle_task_event(
                    token,
                    event,
                    &poll,
                    &mut registry,
                    config,
                    &emitter,
                    &mut counters,
                    now,
                ),
            }
        }

        sweep_deadlines(&mut registry, &poll, config, &emitter, &mut counters, now);
        poke(&mut feeder, &mut registry, &poll, config, &mut counters);
        status.fire_if_due(now, registry.len() as u64, config, &counters);

        if feeder.is_closed() && registry.is_empty() {
            info!("Scan completed");
            return Ok(());
        }
    }
}

/// Computes how long `poll()` may block: the earlier of the next status
/// tick and the earliest task deadline. `mio` has no native timer, so
/// this is how the single-threaded reactor re-checks time-based state
/// without a timer-wheel dependency.
fn next_wakeup(registry: &TaskRegistry, status: &StatusReporter, now: Instant) -> Duration {
    let mut deadline = status.next_deadline();
    for (_, task) in registry.iter() {
        if task.deadline < deadline {
            deadline = task.deadline;
        }
    }
    deadline.saturating_duration_since(now)
}

fn set_stdin_nonblocking() -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(0, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(0, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Reads whatever is currently available on stdin into the feeder,
/// marking it closed on EOF. Drains until `WouldBlock`, the same
/// pattern as draining a readiness-triggered listener socket.
fn handle_stdin_readable(feeder: &mut Feeder) -> io::Result<()> {
    let mut buf = [0u8; 8192];
    loop {
        let n = unsafe { libc::read(0, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n > 0 {
            feeder.feed_bytes(&buf[..n as usize]);
            continue;
        }
        if n == 0 {
            feeder.mark_closed();
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(());
        }
        return Err(err);
    }
}

/// Pulls lines while in_flight < max_concurrent and lines are buffered.
/// Triggered at startup, on new stdin data, and after every task
/// completion.
fn poke(
    feeder: &mut Feeder,
    registry: &mut TaskRegistry,
    poll: &Poll,
    config: &Config,
    counters: &mut Counters,
) {
    while registry.len() < config.concurrent {
        let Some(peer) = feeder.next_target() else {
            break;
        };
        admit(peer, registry, poll, config, counters);
    }
}

/// Dials one target, entering `Phase::Connecting`.
fn admit(peer: Ipv4Addr, registry: &mut TaskRegistry, poll: &Poll, config: &Config, counters: &mut Counters) {
    counters.initiated += 1;
    let addr = SocketAddr::new(peer.into(), config.port);

    match TcpStream::connect(addr) {
        Ok(stream) => {
            let connect_deadline = Instant::now() + Duration::from_secs(config.connect_timeout_secs);
            let task = Task::new(stream, peer, connect_deadline, config.max_read_size);
            let token = registry.insert(task);
            let task = registry.get_mut(token).expect("just inserted");
            if let Err(e) = poll
                .registry()
                .register(&mut task.stream, Token(token), Interest::WRITABLE)
            {
                warn!(peer = %peer, error = %e, "failed to register connecting socket");
                registry.remove(token);
                counters.completed += 1;
            }
        }
        Err(e) => {
            warn!(peer = %peer, error = %e, "could not connect (try raising the fd limit)");
            counters.completed += 1;
        }
    }
}

fn handle_task_event(
    token: usize,
    event: &mio::event::Event,
    poll: &Poll,
    registry: &mut TaskRegistry,
    config: &Config,
    emitter: &Emitter,
    counters: &mut Counters,
    now: Instant,
) {
    let phase = match registry.get_mut(token) {
        Some(task) => task.phase,
        None => return,
    };

    match phase {
        Phase::Connecting => {
            if event.is_writable() || event.is_error() {
                handle_connect_complete(token, poll, registry, config, counters, now);
            }
        }
        Phase::Connected => {
            if event.is_writable() {
                flush_pending_send(token, poll, registry);
            }
            // A send-completion reregister can remove WRITABLE interest;
            // re-check the task still exists and is readable before
            // reading, since a send-completion reregister can happen
            // in between.
            if registry.get_mut(token).is_some() && event.is_readable() {
                handle_read_event(token, poll, registry, config, emitter, counters, now);
            }
        }
        Phase::Terminal => {}
    }
}

fn handle_connect_complete(
    token: usize,
    poll: &Poll,
    registry: &mut TaskRegistry,
    config: &Config,
    counters: &mut Counters,
    now: Instant,
) {
    let task = match registry.get_mut(token) {
        Some(t) => t,
        None => return,
    };

    match task.stream.take_error() {
        Ok(None) => {
            counters.connected += 1;
            task.phase = Phase::Connected;
            task.deadline = now + Duration::from_secs(config.read_timeout_secs);

            let mut interest = Interest::READABLE;
            if let Some(template) = &config.send_template {
                let expanded = expand_template(template, task.peer);
                task.pending_send = Some(PendingSend {
                    bytes: expanded,
                    written: 0,
                });
                interest |= Interest::WRITABLE;
            }
            if let Err(e) = poll.registry().reregister(&mut task.stream, Token(token), interest) {
                debug!(token, error = %e, "reregister after connect failed");
            }
            if task.pending_send.is_some() {
                flush_pending_send(token, poll, registry);
            }
        }
        Ok(Some(_)) | Err(_) => {
            // Asynchronous connect failure: silent, same disposition
            // as a connect timeout, not the synchronous "warn" path
            // `admit` takes for immediate failures.
            terminate_connecting(token, poll, registry, counters);
        }
    }
}

/// Writes as much of `task.pending_send` as the socket will currently
/// accept. Send-on-connect always precedes the first read
/// classification, since this always runs before any
/// `Interest::READABLE` event for this token can be processed in a
/// later reactor tick.
fn flush_pending_send(token: usize, poll: &Poll, registry: &mut TaskRegistry) {
    let task = match registry.get_mut(token) {
        Some(t) => t,
        None => return,
    };

    loop {
        let Some(pending) = &task.pending_send else { break };
        match task.stream.write(pending.remaining()) {
            Ok(0) => break,
            Ok(n) => {
                let pending = task.pending_send.as_mut().unwrap();
                pending.written += n;
                if pending.is_done() {
                    task.pending_send = None;
                    break;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(_) => {
                // Write errors are not specially handled: they surface as
                // a subsequent read failure.
                task.pending_send = None;
                break;
            }
        }
    }

    if task.pending_send.is_none() {
        let _ = poll
            .registry()
            .reregister(&mut task.stream, Token(token), Interest::READABLE);
    }
}

fn handle_read_event(
    token: usize,
    poll: &Poll,
    registry: &mut TaskRegistry,
    config: &Config,
    emitter: &Emitter,
    counters: &mut Counters,
    now: Instant,
) {
    let mut buf = [0u8; 8192];
    loop {
        let task = match registry.get_mut(token) {
            Some(t) => t,
            None => return,
        };

        match task.stream.read(&mut buf) {
            Ok(0) => {
                terminate_stream_end(token, poll, registry, config, emitter, counters);
                return;
            }
            Ok(n) => {
                task.buf.extend_from_slice(&buf[..n]);
                task.deadline = now + Duration::from_secs(config.read_timeout_secs);
                if task.buf.len() >= config.max_read_size {
                    terminate_buffer_full(token, poll, registry, config, emitter, counters);
                    return;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(_) => {
                terminate_stream_end(token, poll, registry, config, emitter, counters);
                return;
            }
        }
    }
}

/// Removes and deregisters a task, counting it completed. Shared tail
/// of every terminal transition.
fn finish_task(token: usize, poll: &Poll, registry: &mut TaskRegistry, counters: &mut Counters) {
    if let Some(mut task) = registry.remove(token) {
        let _ = poll.registry().deregister(&mut task.stream);
    }
    counters.completed += 1;
}

/// Connecting-phase termination (connect timeout, or an asynchronous
/// connect error detected via `take_error`): no classification, no
/// emission, never counted connected.
fn terminate_connecting(token: usize, poll: &Poll, registry: &mut TaskRegistry, counters: &mut Counters) {
    finish_task(token, poll, registry, counters);
}

/// Terminal non-read event while Connected (peer EOF, read error, read
/// timeout): classify whatever bytes were accumulated using the
/// end-of-stream regex path. An empty response never emits while a
/// search pattern is active, regardless of what the pattern would
/// otherwise match against an empty haystack.
fn terminate_stream_end(
    token: usize,
    poll: &Poll,
    registry: &mut TaskRegistry,
    config: &Config,
    emitter: &Emitter,
    counters: &mut Counters,
) {
    if let Some(task) = registry.get_mut(token) {
        let hit = if task.buf.is_empty() {
            !config.matcher.is_enabled()
        } else {
            config.matcher.terminal_hit(&task.buf)
        };
        if hit {
            counters.matched += 1;
            if let Err(e) = emitter.emit(task.peer, &task.buf) {
                warn!(error = %e, "failed to emit result");
            }
        }
    }
    finish_task(token, poll, registry, counters);
}

/// Buffer-cap termination: classify with the cheap substring test, the
/// asymmetric hot-path counterpart to `terminate_stream_end`. Never
/// unify these two call sites.
fn terminate_buffer_full(
    token: usize,
    poll: &Poll,
    registry: &mut TaskRegistry,
    config: &Config,
    emitter: &Emitter,
    counters: &mut Counters,
) {
    if let Some(task) = registry.get_mut(token) {
        if config.matcher.hot_path_hit(&task.buf) {
            counters.matched += 1;
            if let Err(e) = emitter.emit(task.peer, &task.buf) {
                warn!(error = %e, "failed to emit result");
            }
        }
    }
    finish_task(token, poll, registry, counters);
}

/// Sweeps every task whose deadline has elapsed: connect timeouts
/// terminate silently, read timeouts classify-then-emit.
fn sweep_deadlines(
    registry: &mut TaskRegistry,
    poll: &Poll,
    config: &Config,
    emitter: &Emitter,
    counters: &mut Counters,
    now: Instant,
) {
    let expired: Vec<(usize, Phase)> = registry
        .iter()
        .filter(|(_, task)| task.deadline <= now)
        .map(|(token, task)| (token, task.phase))
        .collect();

    for (token, phase) in expired {
        match phase {
            Phase::Connecting => terminate_connecting(token, poll, registry, counters),
            Phase::Connected => terminate_stream_end(token, poll, registry, config, emitter, counters),
            Phase::Terminal => {}
        }
    }
}
