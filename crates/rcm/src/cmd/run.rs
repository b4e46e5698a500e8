use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rcm_packet::{Packet, Status, DEFAULT_POOL_ID, DISCRETE_JOB_ID};
use rcm_server::{PoolParams, RcmClient, RcmError, RcmServer, ServerParams};
use rcm_transport::{LocalTransport, MessageTransport, TransportError};
use tracing::{debug, info};

use crate::builtins::{builtin_fxns, encode_int};
use crate::cmd::RunArgs;
use crate::exit::{
    io_error, rcm_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_replies, OutputFormat, ReplyRow};

/// Poll interval while waiting for CMD messages to settle.
const CMD_POLL: Duration = Duration::from_millis(10);

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be at least 1"));
    }
    let params = load_params(&args)?;

    let transport = Arc::new(LocalTransport::new());
    let shared: Arc<dyn MessageTransport> = transport.clone();
    let mut server = RcmServer::create(shared.clone(), &args.name, params)
        .map_err(|err| rcm_error("server create failed", err))?;
    server
        .start()
        .map_err(|err| rcm_error("server start failed", err))?;

    let client = RcmClient::connect(shared, &args.name, &format!("{}-cli", args.name))
        .map_err(|err| rcm_error("client connect failed", err))?
        .with_reply_timeout(timeout);

    let pool_id = match &args.pool {
        Some(name) => server
            .pool_id(name)
            .ok_or_else(|| CliError::new(USAGE, format!("unknown pool '{name}'")))?,
        None => DEFAULT_POOL_ID,
    };
    let fxn_index = client
        .symbol_index(&args.symbol)
        .map_err(|err| rcm_error("symbol lookup failed", err))?;
    let job_id = if args.job {
        client
            .acquire_job_id()
            .map_err(|err| rcm_error("job id acquire failed", err))?
    } else {
        DISCRETE_JOB_ID
    };

    let payload = resolve_payload(&args);
    info!(
        server = %args.name,
        symbol = %args.symbol,
        fxn_index = format_args!("{fxn_index:#010x}"),
        pool_id = format_args!("{pool_id:#06x}"),
        job_id,
        count = args.count,
        "sending messages"
    );

    let freed_before = transport.stats().freed;
    let started = Instant::now();
    let mut ids = Vec::with_capacity(args.count);
    for _ in 0..args.count {
        let packet = if args.cmd {
            Packet::cmd(fxn_index)
        } else {
            Packet::exec(fxn_index)
        };
        let msg_id = client
            .send(
                packet
                    .with_pool(pool_id)
                    .with_job(job_id)
                    .with_payload(&payload),
            )
            .map_err(|err| rcm_error("send failed", err))?;
        ids.push(msg_id);
    }

    let replies = if args.cmd {
        await_cmds(&transport, &client, args.count, freed_before, timeout)?
    } else {
        ids.iter()
            .map(|msg_id| client.wait_for(*msg_id))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| rcm_error("waiting for reply failed", err))?
    };
    debug!(elapsed_ms = started.elapsed().as_millis() as u64, replies = replies.len(), "done");

    if args.job {
        client
            .release_job_id(job_id)
            .map_err(|err| rcm_error("job id release failed", err))?;
    }
    drop(client);
    server
        .delete()
        .map_err(|err| rcm_error("server delete failed", err))?;

    let rows: Vec<ReplyRow> = replies.iter().map(ReplyRow::from_packet).collect();
    print_replies(&rows, format);

    let all_succeeded = replies.iter().all(|reply| reply.status == Status::Success);
    Ok(if all_succeeded { SUCCESS } else { FAILURE })
}

fn load_params(args: &RunArgs) -> CliResult<ServerParams> {
    let mut params = match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path).map_err(|err| {
                io_error(&format!("failed reading {}", path.display()), err)
            })?;
            serde_json::from_str::<ServerParams>(&raw).map_err(|err| {
                CliError::new(
                    DATA_INVALID,
                    format!("invalid config {}: {err}", path.display()),
                )
            })?
        }
        None => ServerParams::default().with_pool(PoolParams::new("workers", args.workers)),
    };
    params.fxns = builtin_fxns();
    Ok(params)
}

fn resolve_payload(args: &RunArgs) -> Vec<u8> {
    if let Some(value) = args.value {
        return encode_int(value).to_vec();
    }
    if let Some(data) = &args.data {
        return data.as_bytes().to_vec();
    }
    Vec::new()
}

/// Wait until every CMD is accounted for: freed by the server (success)
/// or replied (failure). Returns the replies.
fn await_cmds(
    transport: &LocalTransport,
    client: &RcmClient,
    sent: usize,
    freed_before: u64,
    timeout: Duration,
) -> CliResult<Vec<Packet>> {
    let deadline = Instant::now() + timeout;
    let mut replies = Vec::new();

    loop {
        // The client frees each reply it receives; the rest were freed by
        // the server.
        let freed = transport.stats().freed - freed_before;
        let settled = freed.saturating_sub(replies.len() as u64) as usize + replies.len();
        if settled >= sent {
            return Ok(replies);
        }
        if Instant::now() >= deadline {
            return Err(CliError::new(
                TIMEOUT,
                format!("{} of {sent} commands still pending", sent - settled),
            ));
        }

        match client.recv_timeout(Some(CMD_POLL)) {
            Ok(reply) => replies.push(reply),
            Err(RcmError::Transport(TransportError::Timeout(_))) => {}
            Err(err) => return Err(rcm_error("waiting for reply failed", err)),
        }
    }
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
