//! Line-oriented hypervisor TCP protocol server: one blocking
//! `std::thread` per connection, no cooperative runtime.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::command::CommandTable;
use crate::reply::{format_line, ReplyCode};
use crate::state::HvState;

/// Splits a request line into `<module> <command> <args...>` tokens.
/// Quoting is not supported; tokens are whitespace-delimited, matching the
/// hypervisor protocol's plain-text line format.
fn tokenize(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

fn handle_line(table: &CommandTable, state: &HvState, line: &str) -> Vec<String> {
    let tokens = tokenize(line);
    let (module, cmd, args) = match tokens.as_slice() {
        [] => return vec![format_line(ReplyCode::ErrParsing, true, "empty command")],
        [_module] => return vec![format_line(ReplyCode::ErrParsing, true, "missing command name")],
        [module, cmd, rest @ ..] => (module.clone(), cmd.clone(), rest.to_vec()),
    };

    table
        .dispatch(state, &module, &cmd, &args)
        .into_iter()
        .map(|(code, done, text)| format_line(code, done, &text))
        .collect()
}

fn handle_connection(mut stream: TcpStream, table: Arc<CommandTable>, state: Arc<HvState>) {
    let peer = stream.peer_addr().ok();
    debug!(?peer, "hypervisor client connected");

    let reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!(?peer, error = %e, "failed to clone connection");
            return;
        }
    });

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!(?peer, error = %e, "connection read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let replies = handle_line(&table, &state, &line);
        for reply in replies {
            if stream.write_all(reply.as_bytes()).is_err() {
                return;
            }
        }
    }

    debug!(?peer, "hypervisor client disconnected");
}

/// Binds `addr` and serves hypervisor connections until the process exits.
/// Each connection runs its requests serially on its own thread; there is
/// no shared per-connection state beyond the [`HvState`] registries.
pub fn serve(addr: &str, table: CommandTable, state: HvState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    info!(%addr, "hypervisor server listening");
    let table = Arc::new(table);
    let state = Arc::new(state);

    // Drives every RX listener bound by `atmsw create_vpc`/`create_vcc`,
    // `frsw create_vc`, `atm_bridge create`, and `nic connect` for as long
    // as the server runs; without this loop those bindings would sit idle
    // forever and never actually forward a frame.
    let pump_state = state.clone();
    thread::spawn(move || loop {
        if pump_state.pump_rx(Some(Duration::from_millis(50))).is_err() {
            break;
        }
    });

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let table = table.clone();
        let state = state.clone();
        thread::spawn(move || handle_connection(stream, table, state));
    }

    Ok(())
}
