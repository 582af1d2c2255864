//! bluectrld: makes a local Bluetooth adapter impersonate a combo
//! keyboard/pointer over HID, and serves a local command channel for
//! clients that want to drive it.

use bluectrld::cli::Cli;
use bluectrld::core::Core;
use clap::Parser;
use tracing::info;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if !cli.nodaemon {
        daemonize();
    }

    info!(devid = cli.devid, "starting");
    let core = match Core::new(&cli) {
        Ok(core) => core,
        Err(e) => {
            eprintln!("bluectrld: failed to start: {e}");
            std::process::exit(-e.code().as_wire_code());
        }
    };
    std::process::exit(core.run());
}

fn init_logging(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Classic double-fork daemonization: detaches from the controlling
/// terminal and reparents to init, so a dropped SSH session or shell exit
/// doesn't take the daemon down with it.
fn daemonize() {
    unsafe {
        match libc::fork() {
            -1 => {
                eprintln!("bluectrld: fork failed: {}", std::io::Error::last_os_error());
                std::process::exit(1);
            }
            0 => {}
            _ => std::process::exit(0),
        }

        if libc::setsid() == -1 {
            eprintln!("bluectrld: setsid failed: {}", std::io::Error::last_os_error());
            std::process::exit(1);
        }

        match libc::fork() {
            -1 => {
                eprintln!("bluectrld: fork failed: {}", std::io::Error::last_os_error());
                std::process::exit(1);
            }
            0 => {}
            _ => std::process::exit(0),
        }

        libc::chdir(b"/\0".as_ptr() as *const libc::c_char);
        let devnull = libc::open(b"/dev/null\0".as_ptr() as *const libc::c_char, libc::O_RDWR);
        if devnull >= 0 {
            libc::dup2(devnull, libc::STDIN_FILENO);
            libc::dup2(devnull, libc::STDOUT_FILENO);
            libc::dup2(devnull, libc::STDERR_FILENO);
            if devnull > libc::STDERR_FILENO {
                libc::close(devnull);
            }
        }
    }
}
