use env_logger::Builder;
use log::LevelFilter;
use std::cell::Cell;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

thread_local! {
    // simulated hosts share the process, so the host id is per thread
    static HOST: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Tag every log line written from this thread with `host`, and install the
/// logger on first use. `RUST_LOG` selects the filter, `info` by default.
pub fn init_logging(host: usize) {
    HOST.with(|h| h.set(Some(host)));

    INIT.call_once(|| {
        let _ = Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format(|buf, record| {
                let host = HOST.with(Cell::get);
                match host {
                    Some(host) => write!(buf, "[HOST {}] ", host)?,
                    None => write!(buf, "[MAIN] ")?,
                }
                writeln!(
                    buf,
                    "{} - {}: {}",
                    record.level(),
                    record.target(),
                    record.args()
                )
            })
            .is_test(cfg!(test))
            .try_init();
    });
}

pub fn set_log_level(level: LevelFilter) {
    log::set_max_level(level);
}
