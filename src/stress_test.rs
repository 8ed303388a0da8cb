use async_stream::stream;
use futures::stream::Stream;
use futures::stream::StreamExt;
use mcse_core::{Address, Hash, SequenceState, Unit, UnitBuilder, MAX_PARENTS_PER_UNIT};
use mcse_node::{Node, NodeConfig, NodeConfigBuilder, NodeError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Statistics collected during a stress run
#[derive(Clone, Debug)]
pub struct StressTestStats {
    pub scenario: &'static str,
    pub units_submitted: usize,
    pub stable_frontier: u64,
    pub reorgs: usize,
    pub units_archived: usize,
    pub total_time: Duration,
    pub avg_submit_time: Duration,
    pub units_per_second: f64,
}

impl StressTestStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Stress Test Statistics                         ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Scenario:                  {:>38} ║", self.scenario);
        println!("║  Units Submitted:           {:>38} ║", self.units_submitted);
        println!("║  Stable Frontier (MCI):     {:>38} ║", self.stable_frontier);
        println!("║  Main Chain Reorgs:         {:>38} ║", self.reorgs);
        println!("║  Units Archived:            {:>38} ║", self.units_archived);
        println!("║  Total Time:                {:>39}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Submit Time:       {:>36}µs ║", format!("{:.2}", self.avg_submit_time.as_micros()));
        println!("║  Units/Second:              {:>38.0} ║", self.units_per_second);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

static CLOCK: AtomicU64 = AtomicU64::new(1);

fn next_unit(parents: Vec<Hash>, author: Address) -> Unit {
    UnitBuilder::new()
        .with_parents(parents)
        .with_author(author)
        .with_timestamp(CLOCK.fetch_add(1, Ordering::Relaxed))
        .build()
}

/// One planned submission on top of the current tip
struct Step {
    observer: bool,
    extra_parents: Vec<usize>,
}

/// Generator for honest traffic: witness units interleaved with observer
/// units that also reference random earlier units
fn honest_traffic(len: usize, observer_rate: f64) -> impl Stream<Item = Step> {
    stream! {
        let mut rng = StdRng::from_entropy();
        for _ in 0..len {
            let observer = rng.gen_bool(observer_rate);
            let extras = rng.gen_range(0..3);
            let extra_parents = (0..extras).map(|_| rng.gen::<usize>()).collect();
            yield Step { observer, extra_parents };
        }
    }
}

/// Running totals shared by the scenarios
#[derive(Default)]
struct Recorder {
    submit_times: Vec<Duration>,
    reorgs: usize,
}

impl Recorder {
    async fn submit(&mut self, node: &Node, unit: Unit, sequence: SequenceState) -> Result<Hash, NodeError> {
        let start = Instant::now();
        let submission = node.submit(unit, sequence).await?;
        self.submit_times.push(start.elapsed());
        if submission.main_chain.is_reorg() {
            self.reorgs += 1;
            debug!(
                unit = %submission.unit,
                intersection_mci = submission.main_chain.intersection_mci,
                "stress.reorg"
            );
        }
        Ok(submission.unit)
    }

    fn finish(self, scenario: &'static str, node: &Node, archived: usize, start: Instant) -> StressTestStats {
        let total_time = start.elapsed();
        let avg_submit_time = if !self.submit_times.is_empty() {
            self.submit_times.iter().sum::<Duration>() / self.submit_times.len() as u32
        } else {
            Duration::ZERO
        };
        let units_per_second = self.submit_times.len() as f64 / total_time.as_secs_f64();
        info!(
            scenario,
            units = self.submit_times.len(),
            stable_frontier = node.stable_frontier(),
            reorgs = self.reorgs,
            archived,
            elapsed_ms = total_time.as_millis() as u64,
            "stress.finished"
        );
        StressTestStats {
            scenario,
            units_submitted: self.submit_times.len(),
            stable_frontier: node.stable_frontier(),
            reorgs: self.reorgs,
            units_archived: archived,
            total_time,
            avg_submit_time,
            units_per_second,
        }
    }
}

fn witnesses(config: &NodeConfig) -> Vec<Address> {
    config.witnesses.iter().map(Address::new).collect()
}

async fn current_tip(node: &Node) -> Result<Hash, NodeError> {
    Ok(node.tip()?.unwrap_or_else(|| node.genesis()))
}

/// Extend the main chain with `count` units from rotating witnesses
async fn extend_main_chain(
    node: &Node,
    witnesses: &[Address],
    next_witness: &mut usize,
    count: usize,
    recorder: &mut Recorder,
) -> Result<Vec<Hash>, NodeError> {
    let mut added = Vec::with_capacity(count);
    for _ in 0..count {
        let tip = current_tip(node).await?;
        let author = witnesses[*next_witness % witnesses.len()].clone();
        *next_witness += 1;
        added.push(recorder.submit(node, next_unit(vec![tip], author), SequenceState::Good).await?);
    }
    Ok(added)
}

/// Honest rotating-witness chain with observer traffic
pub async fn stress_test_honest_chain(len: usize, observer_rate: f64) -> Result<StressTestStats, NodeError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Honest Witness Chain                                ║");
    println!("║  Units: {} | Observer rate: {:.2}                          ║", len, observer_rate);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let config = NodeConfig::default();
    let witnesses = witnesses(&config);
    let node = Node::in_memory(config)?;
    let mut recorder = Recorder::default();
    let mut all = vec![node.genesis()];
    let mut next_witness = 1;
    let mut observers = 0;

    let mut traffic = Box::pin(honest_traffic(len, observer_rate));
    while let Some(step) = traffic.next().await {
        let tip = current_tip(&node).await?;
        let mut parents = vec![tip];
        parents.extend(step.extra_parents.iter().map(|i| all[i % all.len()]));
        parents.truncate(MAX_PARENTS_PER_UNIT);

        let author = if step.observer {
            observers += 1;
            Address::new(format!("observer-{}", observers))
        } else {
            next_witness += 1;
            witnesses[(next_witness - 1) % witnesses.len()].clone()
        };
        all.push(recorder.submit(&node, next_unit(parents, author), SequenceState::Good).await?);

        if all.len() % 500 == 0 {
            println!("  Units submitted: {}/{} (stable MCI {})", all.len() - 1, len, node.stable_frontier());
        }
    }

    println!("[Honest] ✓ Completed");
    Ok(recorder.finish("honest chain", &node, 0, start))
}

/// Rounds of concurrent observer units off one tip, merged by a witness
pub async fn stress_test_fan_in(rounds: usize, width: usize) -> Result<StressTestStats, NodeError> {
    let width = width.clamp(1, MAX_PARENTS_PER_UNIT);
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Wide Fan-In                                         ║");
    println!("║  Rounds: {} | Width: {}                                    ║", rounds, width);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let config = NodeConfig::default();
    let witnesses = witnesses(&config);
    let node = Node::in_memory(config)?;
    let mut recorder = Recorder::default();
    let mut next_witness = 1;

    for round in 0..rounds {
        let tip = current_tip(&node).await?;
        let mut handles = Vec::with_capacity(width);
        for lane in 0..width {
            let node = node.clone();
            let unit = next_unit(vec![tip], Address::new(format!("observer-{}", lane)));
            handles.push(tokio::spawn(async move {
                let begin = Instant::now();
                let submission = node.submit(unit, SequenceState::Good).await;
                (submission, begin.elapsed())
            }));
        }

        let mut lanes = Vec::with_capacity(width);
        for handle in handles {
            let (submission, elapsed) = handle
                .await
                .map_err(|err| NodeError::TaskFailed(err.to_string()))?;
            let submission = submission?;
            recorder.submit_times.push(elapsed);
            if submission.main_chain.is_reorg() {
                recorder.reorgs += 1;
            }
            lanes.push(submission.unit);
        }

        let author = witnesses[next_witness % witnesses.len()].clone();
        next_witness += 1;
        recorder.submit(&node, next_unit(lanes, author), SequenceState::Good).await?;

        if (round + 1) % 50 == 0 {
            println!("  Rounds completed: {}/{}", round + 1, rounds);
        }
    }

    println!("[Fan-In] ✓ Completed");
    Ok(recorder.finish("wide fan-in", &node, 0, start))
}

/// A long attacker branch that never gains witnessed level, while the
/// honest main chain keeps growing and stabilizing
pub async fn stress_test_deep_alt_branch(main_len: usize, branch_len: usize) -> Result<StressTestStats, NodeError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Adversarial Deep Alt Branch                         ║");
    println!("║  Main chain: {} | Branch: {}                               ║", main_len, branch_len);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let config = NodeConfig::default();
    let witnesses = witnesses(&config);
    let node = Node::in_memory(config)?;
    let mut recorder = Recorder::default();
    let mut next_witness = 1;

    println!("\n[Phase 1/3] Building honest main chain...");
    extend_main_chain(&node, &witnesses, &mut next_witness, main_len, &mut recorder).await?;
    let frontier_before = node.stable_frontier();

    println!("[Phase 2/3] Attacker builds {} units off the frontier...", branch_len);
    let anchor = node
        .units_at_stable_mci(frontier_before)?
        .first()
        .copied()
        .unwrap_or_else(|| node.genesis());
    let mut last = anchor;
    let mallory = Address::new("mallory");
    for _ in 0..branch_len {
        last = recorder
            .submit(&node, next_unit(vec![last], mallory.clone()), SequenceState::Good)
            .await?;
    }

    println!("[Phase 3/3] Extending main chain past the branch...");
    extend_main_chain(&node, &witnesses, &mut next_witness, main_len, &mut recorder).await?;

    let query_started = Instant::now();
    let included = node.is_included_or_equal(anchor, vec![last]).await?;
    println!(
        "  Frontier {} -> {} | anchor included in branch tip: {} ({:.2}ms)",
        frontier_before,
        node.stable_frontier(),
        included,
        query_started.elapsed().as_secs_f64() * 1000.0
    );

    println!("[Deep Branch] ✓ Completed");
    Ok(recorder.finish("deep alt branch", &node, 0, start))
}

/// Archive a bad branch in bounded batches while honest units keep arriving
pub async fn stress_test_archive(branch_len: usize, batch_size: usize) -> Result<StressTestStats, NodeError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Archiving A Bad Branch                              ║");
    println!("║  Branch: {} | Batch: {}                                    ║", branch_len, batch_size);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let config = NodeConfigBuilder::new().archive_batch_size(batch_size).build();
    let witnesses = witnesses(&config);
    let node = Node::in_memory(config)?;
    let mut recorder = Recorder::default();
    let mut next_witness = 1;

    let main = extend_main_chain(&node, &witnesses, &mut next_witness, 20, &mut recorder).await?;
    let fork_point = main[main.len() - 5];

    let mut root = None;
    let mut last = fork_point;
    let mallory = Address::new("mallory");
    for _ in 0..branch_len {
        last = recorder
            .submit(&node, next_unit(vec![last], mallory.clone()), SequenceState::TempBad)
            .await?;
        root.get_or_insert(last);
    }
    let root = root.unwrap_or(last);

    let archiver = {
        let node = node.clone();
        tokio::spawn(async move { node.archive_uncovered_unit(root).await })
    };

    extend_main_chain(&node, &witnesses, &mut next_witness, 20, &mut recorder).await?;

    let removed = archiver
        .await
        .map_err(|err| NodeError::TaskFailed(err.to_string()))??;
    println!("[Archive] ✓ Removed {} units", removed.len());
    Ok(recorder.finish("archive bad branch", &node, removed.len(), start))
}
