use std::io;
use std::io::Write;
use std::path::PathBuf;

const PROMPT: &str = "rsftp> ";

#[derive(Debug)]
pub enum SftpCommand {
    Ls { path: Option<PathBuf> },
    Cd { path: Option<PathBuf> },
    Pwd,
    Get {
        preserve: bool,
        remote: PathBuf,
        local: Option<PathBuf>,
    },
    Put {
        preserve: bool,
        local: PathBuf,
        remote: Option<PathBuf>,
    },
    Mkdir { path: PathBuf },
    Rmdir { path: PathBuf },
    Rm { path: PathBuf },
    Mv { old: PathBuf, new: PathBuf },
    Ln { target: PathBuf, link: PathBuf },
    Df { path: Option<PathBuf> },
    Stat { path: PathBuf },
    Help,
    Bye,
}

pub struct CommandInterface;

impl CommandInterface {
    pub fn greet() {
        println!("Connected. Type 'help' for the command list.");
    }

    pub fn parse_next_input() -> io::Result<SftpCommand> {
        print!("{PROMPT}");
        io::stdout().flush()?;

        let mut input_buffer = String::new();
        io::stdin().read_line(&mut input_buffer)?;

        let mut tokens = input_buffer.trim().split_whitespace().peekable();

        match tokens.next() {
            Some("ls") => Ok(SftpCommand::Ls {
                path: tokens.next().map(PathBuf::from),
            }),
            Some("cd") => Ok(SftpCommand::Cd {
                path: tokens.next().map(PathBuf::from),
            }),
            Some("pwd") => Ok(SftpCommand::Pwd),
            Some("get") => {
                let preserve = tokens.peek() == Some(&"-p");
                if preserve {
                    tokens.next();
                }
                let remote = tokens.next().map(PathBuf::from).ok_or_else(missing_path)?;
                Ok(SftpCommand::Get {
                    preserve,
                    remote,
                    local: tokens.next().map(PathBuf::from),
                })
            }
            Some("put") => {
                let preserve = tokens.peek() == Some(&"-p");
                if preserve {
                    tokens.next();
                }
                let local = tokens.next().map(PathBuf::from).ok_or_else(missing_path)?;
                Ok(SftpCommand::Put {
                    preserve,
                    local,
                    remote: tokens.next().map(PathBuf::from),
                })
            }
            Some("mkdir") => Ok(SftpCommand::Mkdir {
                path: tokens.next().map(PathBuf::from).ok_or_else(missing_path)?,
            }),
            Some("rmdir") => Ok(SftpCommand::Rmdir {
                path: tokens.next().map(PathBuf::from).ok_or_else(missing_path)?,
            }),
            Some("rm") => Ok(SftpCommand::Rm {
                path: tokens.next().map(PathBuf::from).ok_or_else(missing_path)?,
            }),
            Some("mv") | Some("rename") => {
                let old = tokens.next().map(PathBuf::from).ok_or_else(missing_path)?;
                let new = tokens.next().map(PathBuf::from).ok_or_else(missing_path)?;
                Ok(SftpCommand::Mv { old, new })
            }
            Some("ln") => {
                // Only symbolic links exist in protocol v3
                if tokens.peek() == Some(&"-s") {
                    tokens.next();
                }
                let target = tokens.next().map(PathBuf::from).ok_or_else(missing_path)?;
                let link = tokens.next().map(PathBuf::from).ok_or_else(missing_path)?;
                Ok(SftpCommand::Ln { target, link })
            }
            Some("df") => Ok(SftpCommand::Df {
                path: tokens.next().map(PathBuf::from),
            }),
            Some("stat") => Ok(SftpCommand::Stat {
                path: tokens.next().map(PathBuf::from).ok_or_else(missing_path)?,
            }),
            Some("help") => Ok(SftpCommand::Help),
            Some("bye") | Some("quit") | Some("exit") => Ok(SftpCommand::Bye),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Unknown command!",
            )),
            None => Err(io::Error::new(io::ErrorKind::InvalidInput, "No command")),
        }
    }

    pub fn print_help() {
        println!(
            "Available commands:\n\
             ls [path]              - list a directory\n\
             cd [path]              - change the working directory\n\
             pwd                    - print the working directory\n\
             get [-p] remote [dst]  - download a file (-p preserves mode)\n\
             put [-p] local [dst]   - upload a file (-p preserves mode/times)\n\
             mkdir path             - create a directory\n\
             rmdir path             - remove a directory\n\
             rm path                - remove a file\n\
             mv old new             - rename\n\
             ln -s target link      - create a symlink\n\
             df [path]              - filesystem statistics\n\
             stat path              - show file attributes\n\
             bye                    - exit"
        );
    }
}

fn missing_path() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "Missing path argument")
}
