use remctl::krb5::Krb5Provider;
use remctl::{Config, Connection, Error, Output, Stream};
use std::ffi::OsString;
use std::io::{self, Write};
use std::net::IpAddr;
use std::os::unix::ffi::OsStrExt;
use std::process::ExitCode;
use std::time::Duration;

/// Exit status after the server reported an ERROR token.
const REMOTE_ERROR_EXIT: u8 = 255;

fn print_usage() {
    eprintln!(
        "remctl - run commands on a remote server via the remctl protocol

Usage:
  remctl [options] <host> <command> [args...]

Options:
  -b <source>        Source IP address for the connection
  -d                 Debug logging to stderr
  -h                 Show this help
  -p <port>          Server port (default 4373, falling back to 4444)
  -s <principal>     Service principal (default host/<canonical host>)
  -t <seconds>       Network timeout (0 for none)
  -v                 Print the version
  --json             Print {{stdout, stderr, status}} as JSON instead of
                     passing output through
  --prompt           Run kinit before connecting

Environment:
  RUST_LOG           Log filter (overrides -d)"
    );
}

struct Options {
    debug: bool,
    json: bool,
    prompt: bool,
    config: Config,
    command: Vec<Vec<u8>>,
}

enum Parsed {
    Run(Options),
    Exit(ExitCode),
}

fn parse_args(args: &[OsString]) -> Result<Parsed, String> {
    let mut debug = false;
    let mut json = false;
    let mut prompt = false;
    let mut port = None;
    let mut principal = None;
    let mut timeout = None;
    let mut source = None;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].to_string_lossy();
        if !arg.starts_with('-') {
            break;
        }
        match arg.as_ref() {
            "--" => {
                i += 1;
                break;
            }
            "-d" => debug = true,
            "--json" => json = true,
            "--prompt" => prompt = true,
            "-h" | "--help" => {
                print_usage();
                return Ok(Parsed::Exit(ExitCode::SUCCESS));
            }
            "-v" | "--version" => {
                println!("remctl {}", env!("CARGO_PKG_VERSION"));
                return Ok(Parsed::Exit(ExitCode::SUCCESS));
            }
            "-b" | "-p" | "-s" | "-t" => {
                let flag = arg.to_string();
                i += 1;
                let value = args
                    .get(i)
                    .map(|v| v.to_string_lossy().into_owned())
                    .ok_or_else(|| format!("option {} requires a value", flag))?;
                match flag.as_str() {
                    "-b" => {
                        source = Some(
                            value
                                .parse::<IpAddr>()
                                .map_err(|_| format!("invalid source address: {}", value))?,
                        )
                    }
                    "-p" => {
                        port = Some(
                            value
                                .parse::<u16>()
                                .map_err(|_| format!("invalid port: {}", value))?,
                        )
                    }
                    "-s" => principal = Some(value),
                    _ => {
                        timeout = Some(
                            value
                                .parse::<u64>()
                                .map_err(|_| format!("invalid timeout: {}", value))?,
                        )
                    }
                }
            }
            other => return Err(format!("unknown option: {}", other)),
        }
        i += 1;
    }

    let host = args
        .get(i)
        .map(|h| h.to_string_lossy().into_owned())
        .ok_or("host required")?;
    let command: Vec<Vec<u8>> = args[i + 1..].iter().map(|a| a.as_bytes().to_vec()).collect();
    if command.is_empty() {
        return Err("command required".into());
    }

    let mut config = Config::new(host).with_keepalive(false);
    if let Some(port) = port {
        config = config.with_port(port);
    }
    if let Some(principal) = principal {
        config = config.with_service_principal(principal);
    }
    if let Some(secs) = timeout {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    if let Some(source) = source {
        config = config.with_source_ip(source);
    }
    config.validate().map_err(|e| e.to_string())?;

    Ok(Parsed::Run(Options {
        debug,
        json,
        prompt,
        config,
        command,
    }))
}

/// Get a ticket interactively.
fn kinit(principal: Option<&str>) -> io::Result<()> {
    let mut kinit = std::process::Command::new("kinit");
    if let Some(principal) = principal {
        kinit.arg(principal);
    }
    let status = kinit.status()?;
    if !status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("kinit failed: {}", status),
        ));
    }
    Ok(())
}

/// Pass output through in the order the server sent it.
fn cmd_passthrough(conn: &mut Connection) -> remctl::Result<u8> {
    let stdout = io::stdout();
    let stderr = io::stderr();
    while let Some(output) = conn.output()? {
        match output {
            Output::Data {
                stream: Stream::Stdout,
                data,
            } => {
                let mut out = stdout.lock();
                out.write_all(&data)?;
                out.flush()?;
            }
            Output::Data {
                stream: Stream::Stderr,
                data,
            } => {
                let mut err = stderr.lock();
                err.write_all(&data)?;
                err.flush()?;
            }
            Output::Status(exit) => return Ok(exit),
        }
    }
    Err(Error::NotReady("reply ended without a status"))
}

fn cmd_json(conn: &mut Connection) -> remctl::Result<u8> {
    let response = conn.recv_response()?;
    println!(
        "{}",
        serde_json::json!({
            "stdout": response.stdout_lossy(),
            "stderr": response.stderr_lossy(),
            "status": response.status,
        })
    );
    Ok(response.status.unwrap_or(REMOTE_ERROR_EXIT))
}

/// The server's error message goes to stderr as is, one line.
fn write_remote_error<W: Write>(out: &mut W, message: &str) -> io::Result<()> {
    out.write_all(message.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}

fn run(options: &Options) -> remctl::Result<u8> {
    let provider = Krb5Provider::from_config(&options.config);
    let mut conn = Connection::open(&options.config, &provider)?;
    log::debug!(
        "Authenticated as {} to {}",
        conn.local_name().as_deref().unwrap_or("<unknown>"),
        conn.principal()
    );

    conn.send_command(&options.command, false)?;
    let exit = if options.json {
        cmd_json(&mut conn)?
    } else {
        cmd_passthrough(&mut conn)?
    };
    conn.close()?;
    Ok(exit)
}

fn main() -> ExitCode {
    let args: Vec<OsString> = std::env::args_os().skip(1).collect();

    let options = match parse_args(&args) {
        Ok(Parsed::Run(options)) => options,
        Ok(Parsed::Exit(code)) => return code,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let level = if options.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();

    if options.prompt {
        if let Err(e) = kinit(options.config.login_principal.as_deref()) {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    }

    match run(&options) {
        Ok(exit) => ExitCode::from(exit),
        Err(Error::Remote { code, message }) => {
            if options.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "error": { "code": code.as_u32(), "message": message },
                    })
                );
            } else if let Err(e) = write_remote_error(&mut io::stderr().lock(), &message) {
                log::warn!("Cannot write error message: {}", e);
            }
            ExitCode::from(REMOTE_ERROR_EXIT)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
