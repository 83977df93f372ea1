use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

/// Endpoint selection policy. `take` must tolerate concurrent callers.
pub trait LoadBalancer: Send + Sync {
    fn take(&self, endpoints: &[String]) -> Option<String>;
}

/// Rotates through the endpoint list with a shared counter.
#[derive(Default)]
pub struct RoundRobin {
    acc: AtomicU64,
}

impl LoadBalancer for RoundRobin {
    fn take(&self, endpoints: &[String]) -> Option<String> {
        if endpoints.is_empty() {
            return None;
        }
        let n = self.acc.fetch_add(1, Ordering::Relaxed);
        Some(endpoints[(n % endpoints.len() as u64) as usize].clone())
    }
}

/// Uniform random selection.
#[derive(Default)]
pub struct RandomPick;

impl LoadBalancer for RandomPick {
    fn take(&self, endpoints: &[String]) -> Option<String> {
        if endpoints.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..endpoints.len());
        Some(endpoints[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Vec<String> {
        vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()]
    }

    #[test]
    fn round_robin_cycles() {
        let rr = RoundRobin::default();
        let eps = endpoints();
        let picks: Vec<String> = (0..6).filter_map(|_| rr.take(&eps)).collect();
        assert_eq!(picks[0..3], picks[3..6]);
        let mut distinct = picks[0..3].to_vec();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn empty_list_yields_nothing() {
        assert!(RoundRobin::default().take(&[]).is_none());
        assert!(RandomPick.take(&[]).is_none());
    }

    #[test]
    fn random_pick_stays_in_range() {
        let eps = endpoints();
        for _ in 0..50 {
            let pick = RandomPick.take(&eps).unwrap();
            assert!(eps.contains(&pick));
        }
    }
}
