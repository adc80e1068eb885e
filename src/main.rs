use clap::Parser;
use env_logger::Builder;
use log::{error, info, LevelFilter};
use ssh2::Session;
use std::net::TcpStream;

use rsftp::sftp::client::SftpConn;
use rsftp::sftp::constants::{DEFAULT_NUM_REQUESTS, DEFAULT_TRANSFER_BUFLEN};
use rsftp::sftp::interrupt::Interrupt;
use rsftp::sftp::transport::SharedStream;

mod interface;
mod shell;

use interface::CommandInterface;
use shell::Shell;

#[derive(Parser)]
#[command(name = "rsftp", about = "Interactive SFTP client")]
struct Args {
    /// Host to connect to
    host: String,

    #[arg(short, long, default_value_t = 22)]
    port: u16,

    #[arg(short, long)]
    user: String,

    /// Password; the SSH agent is tried when omitted
    #[arg(long)]
    password: Option<String>,

    /// Bytes requested per READ/WRITE during transfers
    #[arg(short = 'B', long, default_value_t = DEFAULT_TRANSFER_BUFLEN)]
    buffer_size: u32,

    /// Maximum in-flight requests during transfers
    #[arg(short = 'R', long, default_value_t = DEFAULT_NUM_REQUESTS)]
    num_requests: u32,

    /// Log file path
    #[arg(long, default_value = "rsftp.log")]
    log_file: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Log to a file so the prompt stays usable
    let mut builder = Builder::from_default_env();
    builder
        .default_format()
        .filter(None, LevelFilter::Debug)
        .target(env_logger::Target::Pipe(Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&args.log_file)?,
        )))
        .init();

    let tcp = TcpStream::connect((args.host.as_str(), args.port))?;
    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;
    match &args.password {
        Some(password) => session.userauth_password(&args.user, password)?,
        None => session.userauth_agent(&args.user)?,
    }
    info!("SSH connection successful!");

    let mut channel = session.channel_session()?;
    channel.subsystem("sftp")?;

    let stream = SharedStream::new(channel);
    let conn = SftpConn::init(
        stream.clone(),
        stream,
        args.buffer_size,
        args.num_requests,
        Interrupt::new(),
    )?;
    let mut shell = Shell::new(conn)?;

    CommandInterface::greet();

    loop {
        match CommandInterface::parse_next_input() {
            Ok(cmd) => {
                info!("Got command: {:?}", cmd);
                match shell.execute(&cmd) {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        error!("Failed to execute command: {e}");
                        println!("{e}");
                    }
                }
            }
            Err(e) => println!("{e}"),
        }
    }
    Ok(())
}
