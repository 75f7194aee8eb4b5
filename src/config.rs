//! The configuration record the CLI assembles from argv and the
//! environment, and the pre-flight checks `spec.md` §4.4 requires before a
//! [`crate::session::Session`] is ever built.
//!
//! Grounded on `original_source/args.c`'s option table (device name/unit,
//! local address, remote port, source/destination, overwrite/quiet/verbose)
//! and on `spec.md` §6's environment-variable fallback list. `getopts` is
//! `tapip_rs`'s own CLI dependency (a dev-dependency there, used by its
//! `examples/ping.rs`), promoted here to a normal dependency since this
//! crate ships a real CLI binary rather than an example.

use std::path::PathBuf;

use getopts::Options;

use crate::addr::{parse_ipv4, split_host_path};
use crate::error::{Error, Result};
use crate::file::basename;
use crate::pool::linux_raw::MIN_MTU;
use crate::session::WELL_KNOWN_TFTP_PORT;
use crate::wire::{self, EthernetFrame, Ipv4Address, TftpRepr};

/// `spec.md` §6's environment-variable fallbacks.
const ENV_DEVICE: &str = "RAWTFTP_DEVICE";
const ENV_UNIT: &str = "RAWTFTP_UNIT";
const ENV_LOCAL_ADDR: &str = "RAWTFTP_ADDRESS";

/// Whether the client reads a remote file (`RRQ`) or writes one (`WRQ`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The remote server is the source: we send an RRQ.
    Download,
    /// The remote server is the destination: we send a WRQ.
    Upload,
}

/// The validated, pre-flight-checked description of the one file transfer
/// this invocation performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub direction: Direction,
    pub remote_addr: Ipv4Address,
    pub remote_filename: String,
    pub local_path: PathBuf,
}

/// The fully assembled configuration record, passed by value into the core
/// the way `tapip_rs::iface::Config` is passed into `Interface::new`.
#[derive(Debug, Clone)]
pub struct Config {
    pub device: String,
    pub unit: u32,
    pub local_addr: Ipv4Address,
    pub remote_port: u16,
    pub transfer: Transfer,
    pub overwrite: bool,
    pub quiet: bool,
    pub verbose: bool,
}

fn usage(program: &str, opts: &Options) -> String {
    let brief = format!(
        "Usage: {program} [options] SOURCE DESTINATION\n\n\
         Exactly one of SOURCE/DESTINATION must be `address:path`; the other is a local path."
    );
    opts.usage(&brief)
}

impl Config {
    /// Parse `args` (excluding argv[0]) the way `spec.md` §6 describes,
    /// falling back to the environment for device name/unit and local
    /// address when the matching flag is absent.
    pub fn from_args(program: &str, args: &[String]) -> Result<Config> {
        let mut opts = Options::new();
        opts.optopt("d", "device", "link-layer device name", "DEVICE");
        opts.optopt("u", "unit", "link-layer device unit", "UNIT");
        opts.optopt("l", "local", "local IPv4 address (mandatory)", "ADDR");
        opts.optopt("p", "port", "remote TFTP port (default 69)", "PORT");
        opts.optflag("f", "overwrite", "allow replacing an existing destination file");
        opts.optflag("q", "quiet", "suppress non-error console output");
        opts.optflag("v", "verbose", "extra trace output");
        opts.optflag("h", "help", "print this help and exit");

        let matches = opts
            .parse(args)
            .map_err(|e| Error::Argument(e.to_string()))?;

        if matches.opt_present("h") {
            return Err(Error::Argument(usage(program, &opts)));
        }

        if matches.free.len() != 2 {
            return Err(Error::Argument(format!(
                "expected SOURCE and DESTINATION\n\n{}",
                usage(program, &opts)
            )));
        }

        let device = matches
            .opt_str("device")
            .or_else(|| std::env::var(ENV_DEVICE).ok())
            .ok_or_else(|| Error::Argument("no link-layer device name given (-d or RAWTFTP_DEVICE)".into()))?;

        let unit = match matches.opt_str("unit").or_else(|| std::env::var(ENV_UNIT).ok()) {
            Some(text) => text
                .parse::<u32>()
                .map_err(|_| Error::Argument(format!("invalid device unit: {text}")))?,
            None => 0,
        };

        let local_text = matches
            .opt_str("local")
            .or_else(|| std::env::var(ENV_LOCAL_ADDR).ok())
            .ok_or_else(|| Error::Argument("no local IPv4 address given (-l or RAWTFTP_ADDRESS)".into()))?;
        let local_addr =
            parse_ipv4(&local_text).ok_or_else(|| Error::Argument(format!("invalid local address: {local_text}")))?;

        let remote_port = match matches.opt_str("port") {
            Some(text) => {
                let port: u16 = text
                    .parse()
                    .map_err(|_| Error::Argument(format!("invalid remote port: {text}")))?;
                if port == 0 {
                    return Err(Error::Argument("remote port must be 1..65535".into()));
                }
                port
            }
            None => WELL_KNOWN_TFTP_PORT,
        };

        let transfer = resolve_transfer(local_addr, &matches.free[0], &matches.free[1])?;

        Ok(Config {
            device,
            unit,
            local_addr,
            remote_port,
            transfer,
            overwrite: matches.opt_present("overwrite"),
            quiet: matches.opt_present("quiet"),
            verbose: matches.opt_present("verbose"),
        })
    }
}

enum Side {
    Local(String),
    Remote(Ipv4Address, String),
}

fn resolve_side(text: &str) -> Side {
    let (host, path) = split_host_path(text);
    if host == Ipv4Address::UNSPECIFIED {
        Side::Local(path.to_string())
    } else {
        Side::Remote(host, path.to_string())
    }
}

/// Whether `addr` should be treated as "this machine" for the purposes of
/// the self-addressed-transfer check: the configured local address, or
/// either conventional loopback spelling.
fn is_local(local_addr: Ipv4Address, addr: Ipv4Address) -> bool {
    addr == local_addr || addr == Ipv4Address::LOCALHOST || addr == Ipv4Address::UNSPECIFIED
}

fn check_remote(local_addr: Ipv4Address, remote: Ipv4Address) -> Result<()> {
    if is_local(local_addr, remote) {
        return Err(Error::Argument(
            "the remote endpoint must not be the local host".into(),
        ));
    }
    if remote == Ipv4Address::BROADCAST {
        return Err(Error::Argument(
            "the remote endpoint must not be the broadcast address".into(),
        ));
    }
    Ok(())
}

/// The bytes a request packet (Ethernet + IPv4 + UDP headers, plus the RRQ/
/// WRQ body itself) would need on the wire for `filename`, assuming the
/// conservative `MIN_MTU` floor every opened link is guaranteed to clear —
/// `resolve_transfer` runs before the pool (and its real, possibly larger,
/// negotiated MTU) is ever opened.
fn request_packet_len(direction: Direction, filename: &str) -> usize {
    let request = match direction {
        Direction::Download => TftpRepr::Rrq {
            filename,
            mode: wire::tftp::MODE_OCTET,
        },
        Direction::Upload => TftpRepr::Wrq {
            filename,
            mode: wire::tftp::MODE_OCTET,
        },
    };
    EthernetFrame::<&[u8]>::header_len() + wire::ipv4::HEADER_LEN + wire::UDP_HEADER_LEN + request.buffer_len()
}

fn check_filename_fits(direction: Direction, filename: &str) -> Result<()> {
    if request_packet_len(direction, filename) > MIN_MTU {
        return Err(Error::Argument(format!(
            "remote filename {filename:?} is too long to fit in a request packet"
        )));
    }
    Ok(())
}

/// Apply `spec.md` §4.4's pre-flight checks: exactly one of source/
/// destination must be remote, the remote address must not be the local
/// host or loopback, it must not be the broadcast address, and the remote
/// filename must fit in a single request packet. Without a user-supplied
/// local file name, derive one from the remote path's basename.
fn resolve_transfer(local_addr: Ipv4Address, source: &str, destination: &str) -> Result<Transfer> {
    match (resolve_side(source), resolve_side(destination)) {
        (Side::Local(local_path), Side::Remote(remote_addr, remote_filename)) => {
            // A local source and a remote destination: the local file is
            // sent to the server, i.e. a WRQ.
            check_remote(local_addr, remote_addr)?;
            check_filename_fits(Direction::Upload, &remote_filename)?;
            let local_path = if local_path.is_empty() {
                basename(&remote_filename).to_string()
            } else {
                local_path
            };
            Ok(Transfer {
                direction: Direction::Upload,
                remote_addr,
                remote_filename,
                local_path: PathBuf::from(local_path),
            })
        }
        (Side::Remote(remote_addr, remote_filename), Side::Local(local_path)) => {
            // A remote source and a local destination: the server's file is
            // fetched, i.e. an RRQ.
            check_remote(local_addr, remote_addr)?;
            check_filename_fits(Direction::Download, &remote_filename)?;
            let local_path = if local_path.is_empty() {
                basename(&remote_filename).to_string()
            } else {
                local_path
            };
            Ok(Transfer {
                direction: Direction::Download,
                remote_addr,
                remote_filename,
                local_path: PathBuf::from(local_path),
            })
        }
        (Side::Local(_), Side::Local(_)) => Err(Error::Argument(
            "exactly one of SOURCE/DESTINATION must name a remote host (address:path)".into(),
        )),
        (Side::Remote(..), Side::Remote(..)) => Err(Error::Argument(
            "only one of SOURCE/DESTINATION may name a remote host".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);
    const SERVER: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);

    #[test]
    fn download_transfer() {
        // Remote source, local destination: fetch the server's file (RRQ).
        let transfer = resolve_transfer(LOCAL, "10.0.0.1:remote.bin", "out.bin").unwrap();
        assert_eq!(transfer.direction, Direction::Download);
        assert_eq!(transfer.remote_addr, SERVER);
        assert_eq!(transfer.remote_filename, "remote.bin");
        assert_eq!(transfer.local_path, PathBuf::from("out.bin"));
    }

    #[test]
    fn upload_transfer() {
        // Local source, remote destination: send the local file (WRQ).
        let transfer = resolve_transfer(LOCAL, "local.bin", "10.0.0.1:remote.bin").unwrap();
        assert_eq!(transfer.direction, Direction::Upload);
        assert_eq!(transfer.remote_addr, SERVER);
        assert_eq!(transfer.remote_filename, "remote.bin");
        assert_eq!(transfer.local_path, PathBuf::from("local.bin"));
    }

    #[test]
    fn rejects_oversized_remote_filename() {
        let huge_name = "x".repeat(600);
        assert!(resolve_transfer(LOCAL, "local.bin", &format!("10.0.0.1:{huge_name}")).is_err());
        assert!(resolve_transfer(LOCAL, &format!("10.0.0.1:{huge_name}"), "out.bin").is_err());
    }

    #[test]
    fn from_args_end_to_end_upload_direction() {
        // The canonical upload invocation: `tftpclient localfile
        // 10.0.0.1:remotefile` must issue a WRQ, not overwrite `localfile`
        // with an RRQ response.
        let args = vec![
            "-d".to_string(),
            "eth0".to_string(),
            "-l".to_string(),
            "10.0.0.2".to_string(),
            "local.bin".to_string(),
            "10.0.0.1:remote.bin".to_string(),
        ];
        let config = Config::from_args("tftpclient", &args).unwrap();
        assert_eq!(config.transfer.direction, Direction::Upload);
        assert_eq!(config.transfer.local_path, PathBuf::from("local.bin"));
    }

    #[test]
    fn from_args_end_to_end_download_direction() {
        let args = vec![
            "-d".to_string(),
            "eth0".to_string(),
            "-l".to_string(),
            "10.0.0.2".to_string(),
            "10.0.0.1:remote.bin".to_string(),
            "out.bin".to_string(),
        ];
        let config = Config::from_args("tftpclient", &args).unwrap();
        assert_eq!(config.transfer.direction, Direction::Download);
        assert_eq!(config.transfer.local_path, PathBuf::from("out.bin"));
    }

    #[test]
    fn derives_basename_without_explicit_local_name() {
        let transfer = resolve_transfer(LOCAL, "", "10.0.0.1:dir/remote.bin").unwrap();
        assert_eq!(transfer.local_path, PathBuf::from("remote.bin"));
    }

    #[test]
    fn rejects_two_local_paths() {
        assert!(resolve_transfer(LOCAL, "a.bin", "b.bin").is_err());
    }

    #[test]
    fn rejects_two_remote_paths() {
        assert!(resolve_transfer(LOCAL, "10.0.0.1:a.bin", "10.0.0.1:b.bin").is_err());
    }

    #[test]
    fn rejects_self_addressed_transfer() {
        assert!(resolve_transfer(LOCAL, "out.bin", "10.0.0.2:remote.bin").is_err());
        assert!(resolve_transfer(LOCAL, "out.bin", "127.0.0.1:remote.bin").is_err());
    }

    #[test]
    fn rejects_broadcast_destination() {
        assert!(resolve_transfer(LOCAL, "out.bin", "255.255.255.255:remote.bin").is_err());
    }
}
