use rand::Rng;

/// Generates the per-process instance identifier used exclusively for
/// self-echo suppression on the pub/sub bridge (spec.md 3, "Instance
/// identity"). Random component plus a host hint so logs from a fleet are
/// distinguishable at a glance; uniqueness only needs to hold for the
/// lifetime of one process, not across restarts.
pub fn generate_instance_id() -> String {
    let host = hostname_hint();
    let rand_suffix: u64 = rand::thread_rng().gen();
    format!("{host}-{rand_suffix:016x}")
}

fn hostname_hint() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "relay".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_ids_are_distinct() {
        let a = generate_instance_id();
        let b = generate_instance_id();
        assert_ne!(a, b);
    }

    #[test]
    fn instance_id_contains_host_hint() {
        std::env::set_var("HOSTNAME", "worker-7");
        let id = generate_instance_id();
        assert!(id.starts_with("worker-7-"));
        std::env::remove_var("HOSTNAME");
    }
}
