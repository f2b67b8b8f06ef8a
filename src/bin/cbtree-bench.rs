use crossbeam_utils::thread::scope;
use rand::prelude::*;
use std::cmp::max;
use std::mem::ManuallyDrop;
use std::sync::{mpsc, Arc, Barrier};
use std::thread::available_parallelism;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use typenum::{Unsigned, U1, U4};

use cbtree::config::bench::{setup, BenchWriter, Config, Op, OpsPerCs, Perf, DS};
use cbtree::{CbTree, ConcurrentMap, LockedBTree, TreeConfig};

#[cfg(target_os = "linux")]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (config, output) = match setup() {
        Ok(Some(setup)) => setup,
        Ok(None) => return,
        Err(e) => {
            error!(error = %e, "failed to open the output file");
            std::process::exit(1);
        }
    };
    match config.ops_per_cs {
        OpsPerCs::One => bench::<U1>(&config, output),
        OpsPerCs::Four => bench::<U4>(&config, output),
    }
}

fn bench<N: Unsigned>(config: &Config, output: BenchWriter) {
    info!("{}", config);
    let perf = match config.ds {
        // A single writer makes a multi-threaded prefill pointless for the trees.
        DS::CbTree => bench_map::<_, N>(
            config,
            &CbTree::<usize, usize>::with_config(TreeConfig::default()),
            PrefillStrategy::Decreasing,
        ),
        DS::CowTree => bench_map::<_, N>(
            config,
            &CbTree::<usize, usize>::with_config(TreeConfig::copy_on_write()),
            PrefillStrategy::Decreasing,
        ),
        DS::LockedBTree => bench_map::<_, N>(
            config,
            &<LockedBTree<usize, usize> as ConcurrentMap<_, _>>::new(),
            PrefillStrategy::Random,
        ),
    };
    if let Err(e) = output.write_record(config, &perf) {
        error!(error = %e, "failed to write the result");
    }
    info!("{}", perf);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefillStrategy {
    /// Inserts keys in a random order, with multiple threads.
    Random,
    /// Inserts keys in a decreasing order, with a single thread.
    Decreasing,
}

impl PrefillStrategy {
    fn prefill<M: ConcurrentMap<usize, usize> + Send + Sync>(self, config: &Config, map: &M) {
        match self {
            PrefillStrategy::Random => {
                let threads = available_parallelism().map(|v| v.get()).unwrap_or(1);
                info!(threads, "prefilling");
                scope(|s| {
                    for t in 0..threads {
                        s.spawn(move |_| {
                            let handle = map.reclaimer().register();
                            let rng = &mut rand::thread_rng();
                            let count = config.prefill / threads
                                + if t < config.prefill % threads { 1 } else { 0 };
                            for _ in 0..count {
                                let key = config.key_dist.sample(rng);
                                let value = key;
                                map.insert(key, value, &handle.pin());
                            }
                        });
                    }
                })
                .unwrap();
            }
            PrefillStrategy::Decreasing => {
                info!(threads = 1, "prefilling");
                let handle = map.reclaimer().register();
                let rng = &mut rand::thread_rng();
                let mut keys = Vec::with_capacity(config.prefill);
                for _ in 0..config.prefill {
                    keys.push(config.key_dist.sample(rng));
                }
                keys.sort_by(|a, b| b.cmp(a));
                for key in keys.drain(..) {
                    let value = key;
                    map.insert(key, value, &handle.pin());
                }
            }
        }
        info!("prefilled");
    }
}

fn bench_map<M: ConcurrentMap<usize, usize> + Send + Sync, N: Unsigned>(
    config: &Config,
    map: &M,
    strategy: PrefillStrategy,
) -> Perf {
    strategy.prefill(config, map);
    let before = map.stats();

    let barrier = &Arc::new(Barrier::new(config.threads + config.aux_thread));
    let (ops_sender, ops_receiver) = mpsc::channel();
    let (mem_sender, mem_receiver) = mpsc::channel();

    scope(|s| {
        // sampling & interference thread
        if config.aux_thread > 0 {
            let mem_sender = mem_sender.clone();
            s.spawn(move |_| {
                let mut samples = 0usize;
                let mut acc = 0usize;
                let mut peak = 0usize;
                let handle = map.reclaimer().register();
                barrier.clone().wait();

                let start = Instant::now();
                // Immediately drop if no non-coop else keep it and repin periodically.
                let mut guard = ManuallyDrop::new(handle.pin());
                if config.non_coop == 0 {
                    unsafe { ManuallyDrop::drop(&mut guard) };
                }
                let mut next_sampling = start + config.sampling_period;
                let mut next_repin = start + config.non_coop_period;
                while start.elapsed() < config.duration {
                    let now = Instant::now();
                    if config.sampling && now > next_sampling {
                        let allocated = config.mem_sampler.sample();
                        samples += 1;

                        acc += allocated;
                        peak = max(peak, allocated);

                        next_sampling = now + config.sampling_period;
                    }
                    if config.non_coop > 0 && now > next_repin {
                        (*guard).repin();
                        next_repin = now + config.non_coop_period;
                    }
                    std::thread::sleep(config.aux_thread_period);
                }

                if config.non_coop > 0 {
                    unsafe { ManuallyDrop::drop(&mut guard) };
                }

                if samples > 0 {
                    mem_sender.send((peak, acc / samples)).unwrap();
                } else {
                    mem_sender.send((0, 0)).unwrap();
                }
            });
        } else {
            mem_sender.send((0, 0)).unwrap();
        }

        for _ in 0..config.threads {
            let ops_sender = ops_sender.clone();
            s.spawn(move |_| {
                let mut ops: u64 = 0;
                let mut rng = &mut rand::thread_rng();
                let handle = map.reclaimer().register();
                barrier.clone().wait();
                let start = Instant::now();

                let mut guard = handle.pin();
                while start.elapsed() < config.duration {
                    let key = config.key_dist.sample(rng);
                    match Op::OPS[config.op_dist.sample(&mut rng)] {
                        Op::Get => {
                            map.get(&key, &guard);
                        }
                        Op::Insert => {
                            let value = key;
                            map.insert(key, value, &guard);
                        }
                        Op::Remove => {
                            map.remove(&key, &guard);
                        }
                    }
                    ops += 1;
                    if ops % N::to_u64() == 0 {
                        guard.repin();
                    }
                }

                ops_sender.send(ops).unwrap();
            });
        }
    })
    .unwrap();
    info!("end");

    let mut ops = 0;
    for _ in 0..config.threads {
        let local_ops = ops_receiver.recv().unwrap();
        ops += local_ops;
    }
    let ops_per_sec = ops / config.interval;
    let (peak_mem, avg_mem) = mem_receiver.recv().unwrap();
    Perf {
        ops_per_sec,
        peak_mem,
        avg_mem,
        tree: map.stats().since(&before),
    }
}
