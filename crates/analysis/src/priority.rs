//! Priority determination (spec §4.L): ranks agents by how far their
//! observed-latency distribution sits from an ideal (all-zero) distribution.
//!
//! `scipy.stats.wasserstein_distance` and `sklearn.manifold.MDS` have no
//! teacher equivalent; both are reimplemented directly against `ndarray`
//! (adopted from `other_examples/manifests/surrealdb-surrealdb` and
//! `other_examples/manifests/rerpha-supermusr-data-pipeline`, which use it
//! for numerical arrays). Classical (eigendecomposition) MDS is the
//! standard closed form for 1-D metric MDS and needs no external RNG, so the
//! dominant eigenvector is found by power iteration from a fixed starting
//! vector rather than a general dense solver — deterministic by
//! construction, which is why `rank_agents`'s `seed` parameter is a
//! documented no-op kept only for interface parity with the distilled spec.

use std::collections::HashMap;

use ndarray::{Array1, Array2, Axis};

const IDEAL_AGENT: &str = "Ideal";
const IDEAL_SAMPLE_LEN: usize = 50;
const POWER_ITERATIONS: usize = 200;

/// Outcome of ranking agents by distance from the ideal distribution.
#[derive(Debug, Clone)]
pub struct PriorityResult {
    /// Absolute MDS-position distance from "Ideal", per agent.
    pub agent_positions: HashMap<String, f64>,
    /// Agents ordered by ascending distance (closest to ideal first).
    pub ranked_agents: Vec<String>,
}

/// Flattens a `{msg_id: {agent_name: latency}}` result into per-agent
/// latency samples keyed by a synthetic `"{agent}_{msg_id}"` request name.
pub fn convert_result(
    result: &HashMap<i64, HashMap<String, f64>>,
) -> (HashMap<String, Vec<String>>, HashMap<String, f64>) {
    let mut agent_requests: HashMap<String, Vec<String>> = HashMap::new();
    let mut time_map: HashMap<String, f64> = HashMap::new();

    for (msg_id, agent_times) in result {
        for (agent, time) in agent_times {
            let req_name = format!("{agent}_{msg_id}");
            agent_requests.entry(agent.clone()).or_default().push(req_name.clone());
            time_map.insert(req_name, *time);
        }
    }

    (agent_requests, time_map)
}

/// Ranks agents across one or more per-framework results. Later results
/// overwrite earlier ones for the same agent (mirrors the source's
/// sequential `dict.update` merge, not an accumulating union).
pub fn rank_agents(results: &[HashMap<i64, HashMap<String, f64>>], _seed: u64) -> PriorityResult {
    let mut merged_requests: HashMap<String, Vec<String>> = HashMap::new();
    let mut merged_time_map: HashMap<String, f64> = HashMap::new();

    for result in results {
        let (requests, times) = convert_result(result);
        merged_requests.extend(requests);
        merged_time_map.extend(times);
    }

    agent_wasserstein_mds_sort(&merged_requests, &merged_time_map)
}

pub fn agent_wasserstein_mds_sort(
    agent_requests: &HashMap<String, Vec<String>>,
    time_map: &HashMap<String, f64>,
) -> PriorityResult {
    let mut agents: Vec<String> = agent_requests.keys().cloned().collect();
    agents.sort();

    let mut distributions: HashMap<String, Vec<f64>> = HashMap::new();
    for agent in &agents {
        let dist: Vec<f64> = agent_requests[agent]
            .iter()
            .filter_map(|req| time_map.get(req).copied())
            .collect();
        distributions.insert(agent.clone(), dist);
    }
    distributions.insert(IDEAL_AGENT.to_string(), vec![0.0; IDEAL_SAMPLE_LEN]);

    let mut all_agents = agents.clone();
    all_agents.push(IDEAL_AGENT.to_string());
    let n = all_agents.len();

    let mut distance_matrix = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            if i != j {
                distance_matrix[[i, j]] =
                    wasserstein_distance_1d(&distributions[&all_agents[i]], &distributions[&all_agents[j]]);
            }
        }
    }

    let positions = classical_mds_1d(&distance_matrix);
    let ideal_index = all_agents.iter().position(|a| a == IDEAL_AGENT).expect("ideal agent inserted above");
    let ideal_position = positions[ideal_index];

    let mut agent_positions: HashMap<String, f64> = HashMap::new();
    for agent in &agents {
        let idx = all_agents.iter().position(|a| a == agent).expect("agent present in all_agents");
        agent_positions.insert(agent.clone(), (positions[idx] - ideal_position).abs());
    }

    let mut ranked_agents = agents;
    ranked_agents.sort_by(|a, b| agent_positions[a].total_cmp(&agent_positions[b]));

    PriorityResult { agent_positions, ranked_agents }
}

/// Observed mean latency per agent, used to seed `PREDICT_TIME_TABLE`.
pub fn mean_predicted_times(agent_requests: &HashMap<String, Vec<String>>, time_map: &HashMap<String, f64>) -> HashMap<String, f64> {
    agent_requests
        .iter()
        .map(|(agent, reqs)| {
            let samples: Vec<f64> = reqs.iter().filter_map(|r| time_map.get(r).copied()).collect();
            let mean = if samples.is_empty() { 0.0 } else { samples.iter().sum::<f64>() / samples.len() as f64 };
            (agent.clone(), mean)
        })
        .collect()
}

/// Ascending-rank priority (1.0 = highest priority / closest to ideal),
/// used to seed `PRIORITY_TABLE`.
pub fn priority_table_from_ranking(ranked_agents: &[String]) -> HashMap<String, f64> {
    ranked_agents
        .iter()
        .enumerate()
        .map(|(i, agent)| (agent.clone(), (i + 1) as f64))
        .collect()
}

/// 1-D Wasserstein (earth-mover) distance between two empirical samples,
/// computed via the CDF-stepping closed form scipy uses internally: sort
/// both samples, walk the merged support, and accumulate `|ΔCDF| * Δx`.
fn wasserstein_distance_1d(u: &[f64], v: &[f64]) -> f64 {
    if u.is_empty() || v.is_empty() {
        return 0.0;
    }

    let mut u_sorted = u.to_vec();
    u_sorted.sort_by(f64::total_cmp);
    let mut v_sorted = v.to_vec();
    v_sorted.sort_by(f64::total_cmp);

    let mut all_values: Vec<f64> = u_sorted.iter().chain(v_sorted.iter()).copied().collect();
    all_values.sort_by(f64::total_cmp);

    let mut distance = 0.0;
    for i in 0..all_values.len().saturating_sub(1) {
        let delta = all_values[i + 1] - all_values[i];
        if delta == 0.0 {
            continue;
        }
        let u_cdf = search_sorted_right(&u_sorted, all_values[i]) as f64 / u_sorted.len() as f64;
        let v_cdf = search_sorted_right(&v_sorted, all_values[i]) as f64 / v_sorted.len() as f64;
        distance += (u_cdf - v_cdf).abs() * delta;
    }
    distance
}

fn search_sorted_right(sorted: &[f64], value: f64) -> usize {
    sorted.partition_point(|&x| x <= value)
}

/// Classical (metric) MDS into 1 dimension via double-centering followed by
/// power iteration for the dominant eigenpair of the resulting Gram matrix.
fn classical_mds_1d(distance_matrix: &Array2<f64>) -> Array1<f64> {
    let n = distance_matrix.shape()[0];
    let d2 = distance_matrix.mapv(|x| x * x);

    let row_means = d2.mean_axis(Axis(1)).expect("non-empty matrix");
    let col_means = d2.mean_axis(Axis(0)).expect("non-empty matrix");
    let grand_mean = d2.mean().expect("non-empty matrix");

    let mut b = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            b[[i, j]] = -0.5 * (d2[[i, j]] - row_means[i] - col_means[j] + grand_mean);
        }
    }

    let (eigenvector, eigenvalue) = dominant_eigenpair(&b, POWER_ITERATIONS);
    let scale = eigenvalue.max(0.0).sqrt();
    eigenvector.mapv(|x| x * scale)
}

/// Power iteration from a fixed starting vector — deterministic, no RNG.
fn dominant_eigenpair(matrix: &Array2<f64>, iterations: usize) -> (Array1<f64>, f64) {
    let n = matrix.shape()[0];
    if n == 0 {
        return (Array1::zeros(0), 0.0);
    }

    let mut v = Array1::<f64>::from_elem(n, 1.0 / (n as f64).sqrt());
    let mut eigenvalue = 0.0;

    for _ in 0..iterations {
        let next = matrix.dot(&v);
        let norm = next.dot(&next).sqrt();
        if norm < 1e-12 {
            break;
        }
        let next = next.mapv(|x| x / norm);
        eigenvalue = next.dot(&matrix.dot(&next));
        v = next;
    }

    (v, eigenvalue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wasserstein_distance_zero_for_identical_samples() {
        let d = wasserstein_distance_1d(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn wasserstein_distance_matches_mean_shift() {
        // Two uniform samples offset by a constant shift `c` have
        // Wasserstein distance `c`.
        let u = vec![0.0, 1.0, 2.0, 3.0];
        let v = vec![5.0, 6.0, 7.0, 8.0];
        let d = wasserstein_distance_1d(&u, &v);
        assert!((d - 5.0).abs() < 1e-9, "expected ~5.0, got {d}");
    }

    #[test]
    fn convert_result_builds_per_agent_requests_and_time_map() {
        let mut result = HashMap::new();
        let mut agent_times = HashMap::new();
        agent_times.insert("writer".to_string(), 1.5);
        result.insert(1i64, agent_times);

        let (requests, times) = convert_result(&result);
        assert_eq!(requests["writer"], vec!["writer_1".to_string()]);
        assert_eq!(times["writer_1"], 1.5);
    }

    #[test]
    fn low_latency_agent_ranks_closer_to_ideal() {
        let mut requests: HashMap<String, Vec<String>> = HashMap::new();
        let mut times: HashMap<String, f64> = HashMap::new();

        requests.insert("fast".to_string(), vec!["fast_1".to_string(), "fast_2".to_string()]);
        times.insert("fast_1".to_string(), 0.1);
        times.insert("fast_2".to_string(), 0.2);

        requests.insert("slow".to_string(), vec!["slow_1".to_string(), "slow_2".to_string()]);
        times.insert("slow_1".to_string(), 50.0);
        times.insert("slow_2".to_string(), 60.0);

        let result = agent_wasserstein_mds_sort(&requests, &times);
        assert_eq!(result.ranked_agents, vec!["fast".to_string(), "slow".to_string()]);
        assert!(result.agent_positions["fast"] < result.agent_positions["slow"]);
    }

    #[test]
    fn priority_table_assigns_ascending_ranks() {
        let ranked = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let table = priority_table_from_ranking(&ranked);
        assert_eq!(table["a"], 1.0);
        assert_eq!(table["b"], 2.0);
        assert_eq!(table["c"], 3.0);
    }

    #[test]
    fn mean_predicted_times_averages_samples() {
        let mut requests: HashMap<String, Vec<String>> = HashMap::new();
        requests.insert("writer".to_string(), vec!["writer_1".to_string(), "writer_2".to_string()]);
        let mut times = HashMap::new();
        times.insert("writer_1".to_string(), 2.0);
        times.insert("writer_2".to_string(), 4.0);

        let means = mean_predicted_times(&requests, &times);
        assert_eq!(means["writer"], 3.0);
    }
}
