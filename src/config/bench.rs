//! Command line and output of the `cbtree-bench` binary.

use std::fmt;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io;
use std::path::Path;
use std::time::Duration;

use cfg_if::cfg_if;
use clap::{value_parser, Arg, ArgAction, Command, ValueEnum};
use csv::Writer;
use rand::distributions::{Uniform, WeightedIndex};

use crate::stats::StatsSnapshot;

#[derive(PartialEq, Debug, ValueEnum, Clone, Copy)]
pub enum DS {
    /// Tree reusing nodes in place where possible.
    CbTree,
    /// Tree copying the whole search path on every update.
    CowTree,
    /// `BTreeMap` behind a reader-writer lock.
    LockedBTree,
}

impl DS {
    pub fn name(&self) -> String {
        self.to_possible_value()
            .map(|v| v.get_name().to_string())
            .unwrap_or_default()
    }
}

pub enum OpsPerCs {
    One,
    Four,
}

impl fmt::Display for OpsPerCs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpsPerCs::One => write!(f, "1"),
            OpsPerCs::Four => write!(f, "4"),
        }
    }
}

#[derive(PartialEq, Debug)]
pub enum Op {
    Get,
    Insert,
    Remove,
}

impl Op {
    pub const OPS: [Op; 3] = [Op::Get, Op::Insert, Op::Remove];
}

#[derive(Clone, Copy, PartialEq)]
pub enum GetRate {
    WriteOnly = 0,
    ReadWrite = 1,
    ReadIntensive = 2,
    ReadOnly = 3,
}

pub struct Config {
    pub ds: DS,
    pub threads: usize,

    pub aux_thread: usize,
    pub aux_thread_period: Duration,
    pub non_coop: u8,
    pub non_coop_period: Duration,
    pub sampling: bool,
    pub sampling_period: Duration,

    pub get_rate: GetRate,
    pub op_dist: WeightedIndex<i32>,
    pub key_dist: Uniform<usize>,
    pub prefill: usize,
    pub key_range: usize,
    pub interval: u64,
    pub duration: Duration,
    pub ops_per_cs: OpsPerCs,

    pub mem_sampler: MemSampler,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} threads, n{}, c{}, g{}, range {}",
            self.ds.name(),
            self.threads,
            self.non_coop,
            self.ops_per_cs,
            self.get_rate as u8,
            self.key_range,
        )
    }
}

cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub struct MemSampler {
            mibs: Option<(
                tikv_jemalloc_ctl::epoch_mib,
                tikv_jemalloc_ctl::stats::allocated_mib,
            )>,
        }

        impl MemSampler {
            pub fn new() -> Self {
                let mibs = tikv_jemalloc_ctl::epoch::mib()
                    .and_then(|epoch| Ok((epoch, tikv_jemalloc_ctl::stats::allocated::mib()?)))
                    .map_err(|e| tracing::warn!(error = %e, "jemalloc stats are unavailable"))
                    .ok();
                MemSampler { mibs }
            }

            pub fn available(&self) -> bool {
                self.mibs.is_some()
            }

            /// Bytes currently allocated through jemalloc.
            pub fn sample(&self) -> usize {
                let Some((epoch, allocated)) = &self.mibs else {
                    return 0;
                };
                if epoch.advance().is_err() {
                    return 0;
                }
                allocated.read().unwrap_or(0)
            }
        }
    } else {
        pub struct MemSampler {}

        impl MemSampler {
            pub fn new() -> Self {
                tracing::warn!("memory usage sampling is only supported on linux");
                MemSampler {}
            }

            pub fn available(&self) -> bool {
                false
            }

            pub fn sample(&self) -> usize {
                0
            }
        }
    }
}

pub struct BenchWriter {
    output: Option<Writer<File>>,
}

#[derive(Clone)]
pub struct Perf {
    pub ops_per_sec: u64,
    pub peak_mem: usize,
    pub avg_mem: usize,
    pub tree: StatsSnapshot,
}

impl fmt::Display for Perf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ops/s: {}, peak mem: {}, avg_mem: {}, {}",
            self.ops_per_sec,
            readable_bytes(self.peak_mem),
            readable_bytes(self.avg_mem),
            self.tree,
        )
    }
}

fn readable_bytes(num: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    for (i, unit) in UNITS.iter().enumerate() {
        if num / 2usize.pow(i as u32 * 10) < 1000 {
            return format!("{:.3} {}", num as f64 / 2f64.powf(i as f64 * 10.0), unit);
        }
    }
    format!(
        "{:.3} {}",
        num as f64 / 2f64.powf((UNITS.len() - 1) as f64 * 10.0),
        UNITS[UNITS.len() - 1]
    )
}

const HEADER: [&str; 16] = [
    "ds",
    "threads",
    "sampling_period",
    "non_coop",
    "get_rate",
    "ops_per_cs",
    "throughput",
    "peak_mem",
    "avg_mem",
    "allocated",
    "retired",
    "in_place",
    "rotations",
    "aborted",
    "key_range",
    "interval",
];

impl BenchWriter {
    pub fn write_record(self, config: &Config, perf: &Perf) -> csv::Result<()> {
        let Some(mut output) = self.output else {
            return Ok(());
        };
        output.write_record(&[
            config.ds.name(),
            config.threads.to_string(),
            config.sampling_period.as_millis().to_string(),
            config.non_coop.to_string(),
            (config.get_rate as u8).to_string(),
            config.ops_per_cs.to_string(),
            perf.ops_per_sec.to_string(),
            perf.peak_mem.to_string(),
            perf.avg_mem.to_string(),
            perf.tree.allocated.to_string(),
            perf.tree.retired.to_string(),
            perf.tree.in_place.to_string(),
            perf.tree.rotations.to_string(),
            perf.tree.aborted.to_string(),
            config.key_range.to_string(),
            config.interval.to_string(),
        ])?;
        output.flush()?;
        Ok(())
    }
}

fn open_output(output_name: &str) -> csv::Result<Writer<File>> {
    let output_path = Path::new(output_name);
    if let Some(dir) = output_path.parent() {
        create_dir_all(dir)?;
    }
    match OpenOptions::new().read(true).append(true).open(output_path) {
        Ok(f) => Ok(Writer::from_writer(f)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let f = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(output_path)?;
            let mut output = Writer::from_writer(f);
            output.write_record(HEADER)?;
            output.flush()?;
            Ok(output)
        }
        Err(e) => Err(e.into()),
    }
}

fn command() -> Command {
    Command::new("cbtree-bench")
        .arg(
            Arg::new("data structure")
                .short('d')
                .value_parser(value_parser!(DS))
                .required(true)
                .ignore_case(true)
                .help("Data structure(s)"),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .value_parser(value_parser!(usize))
                .required(true)
                .help("Numbers of threads to run."),
        )
        .arg(
            Arg::new("non-coop")
                .short('n')
                .value_parser(value_parser!(u8).range(0..3))
                .help(
                    "The degree of non-cooperation. \
                     1: 1ms, 2: 10ms, 0: no non-cooperation",
                )
                .default_value("0"),
        )
        .arg(
            Arg::new("get rate")
                .short('g')
                .value_parser(value_parser!(u8).range(0..4))
                .help(
                    "The proportion of `get`(read) operations. \
                     0: 0%, 1: 50%, 2: 90%, 3: 100%",
                )
                .default_value("0"),
        )
        .arg(
            Arg::new("range")
                .short('r')
                .value_parser(value_parser!(u64).range(1..))
                .help("Key range: [0..RANGE]")
                .default_value("100000"),
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .value_parser(value_parser!(u64).range(1..))
                .help("Time interval in seconds to run the benchmark")
                .default_value("10"),
        )
        .arg(
            Arg::new("sampling period")
                .short('s')
                .value_parser(value_parser!(u64))
                .help(
                    "The period to query jemalloc stats.allocated (ms). 0 for no sampling. \
                     Only supported on linux.",
                )
                .default_value("1"),
        )
        .arg(
            Arg::new("ops per cs")
                .short('c')
                .value_parser(["1", "4"])
                .help("Operations per each critical section")
                .default_value("1"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .help("Output CSV filename. Appends the data if the file already exists."),
        )
        .arg(
            Arg::new("dry run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Check whether the arguments are parsable, without running a benchmark"),
        )
}

/// Parses the command line. Returns `None` on a dry run.
pub fn setup() -> csv::Result<Option<(Config, BenchWriter)>> {
    let m = command().get_matches();

    // Every argument below is either required or has a default.
    let ds = m.get_one::<DS>("data structure").copied().unwrap();
    let threads = m.get_one::<usize>("threads").copied().unwrap();
    let non_coop = m.get_one::<u8>("non-coop").copied().unwrap();
    let get_rate = match m.get_one::<u8>("get rate").copied().unwrap() {
        0 => GetRate::WriteOnly,
        1 => GetRate::ReadWrite,
        2 => GetRate::ReadIntensive,
        3 => GetRate::ReadOnly,
        _ => unreachable!("get_rate is invalid"),
    };
    let key_range = m.get_one::<u64>("range").copied().unwrap() as usize;
    let prefill = key_range / 2;
    let key_dist = Uniform::from(0..key_range);
    let interval = m.get_one::<u64>("interval").copied().unwrap();
    let sampling_period = m.get_one::<u64>("sampling period").copied().unwrap();
    let ops_per_cs = match m.get_one::<String>("ops per cs").unwrap().as_str() {
        "1" => OpsPerCs::One,
        "4" => OpsPerCs::Four,
        _ => unreachable!("ops_per_cs should be one or four"),
    };
    let duration = Duration::from_secs(interval);

    let op_weights = match get_rate {
        GetRate::WriteOnly => &[0, 1, 1],
        GetRate::ReadWrite => &[2, 1, 1],
        GetRate::ReadIntensive => &[18, 1, 1],
        GetRate::ReadOnly => &[1, 0, 0],
    };
    let op_dist = WeightedIndex::new(op_weights).unwrap();

    let mem_sampler = MemSampler::new();
    let sampling = sampling_period > 0 && mem_sampler.available();

    if m.get_flag("dry run") {
        return Ok(None);
    }

    let output = m
        .get_one::<String>("output")
        .map(|name| open_output(name))
        .transpose()?;

    let config = Config {
        ds,
        threads,

        aux_thread: if sampling || non_coop > 0 { 1 } else { 0 },
        aux_thread_period: Duration::from_millis(1),
        non_coop,
        non_coop_period: match non_coop {
            1 => Duration::from_millis(1),
            2 => Duration::from_millis(10),
            _ => Duration::from_secs(interval),
        },
        sampling,
        sampling_period: Duration::from_millis(sampling_period),

        get_rate,
        op_dist,
        key_dist,
        prefill,
        key_range,
        interval,
        duration,
        ops_per_cs,

        mem_sampler,
    };

    Ok(Some((config, BenchWriter { output })))
}

#[cfg(test)]
mod tests {
    use super::{command, readable_bytes, DS};

    #[test]
    fn parses_arguments() {
        let m = command()
            .try_get_matches_from(["cbtree-bench", "-d", "cow-tree", "-t", "4", "-g", "2"])
            .unwrap();
        assert_eq!(m.get_one::<DS>("data structure"), Some(&DS::CowTree));
        assert_eq!(m.get_one::<usize>("threads"), Some(&4));
        assert_eq!(m.get_one::<u64>("range"), Some(&100000));

        assert!(command()
            .try_get_matches_from(["cbtree-bench", "-d", "locked-b-tree", "-t", "1"])
            .is_ok());
        assert!(command()
            .try_get_matches_from(["cbtree-bench", "-d", "cb-tree", "-t", "1", "-g", "7"])
            .is_err());
    }

    #[test]
    fn readable() {
        assert_eq!(readable_bytes(512), "512.000 B");
        assert_eq!(readable_bytes(2048), "2.000 KiB");
        assert_eq!(readable_bytes(3 << 20), "3.000 MiB");
    }
}
