use caph_domain::{Host, Machine};

/// A host is a candidate for binding to a machine iff it is unclaimed,
/// not under maintenance, free of a permanent error, in the machine's
/// cluster, and its labels satisfy the machine's selector.
pub fn is_candidate(host: &Host, machine: &Machine) -> bool {
    host.consumer_ref.is_none()
        && !host.maintenance
        && !host.status.permanent_error
        && host.cluster_ref == machine.cluster_ref
        && machine.selector.matches(&host.labels)
}

/// Narrow a host inventory down to the candidates for a machine, preferring
/// the host that has gone longest (or never) since it was last provisioned.
/// Returns `None` if no host qualifies.
pub fn pick_host<'a>(hosts: &'a [Host], machine: &Machine) -> Option<&'a Host> {
    hosts
        .iter()
        .filter(|h| is_candidate(h, machine))
        .min_by_key(|h| h.status.last_provisioned_at.unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use caph_domain::{
        ConsumerRef, HostSelector, HostStatus, InstallImage, NamespacedName, RootDeviceHints, SshSpec,
    };

    use super::*;

    fn host(name: &str, cluster: &str) -> Host {
        Host {
            name: caph_domain::HostName::new(name),
            server_id: 1,
            description: None,
            cluster_ref: NamespacedName::new("default", cluster),
            rescue_secret_ref: NamespacedName::new("default", "rescue-key"),
            root_device_hints: RootDeviceHints { wwn: Some("0x1".into()), raid: vec![] },
            consumer_ref: None,
            maintenance: false,
            wipe_disk_on_release: false,
            labels: HashMap::new(),
            status: HostStatus::default(),
        }
    }

    fn machine(cluster: &str) -> Machine {
        Machine {
            name: caph_domain::MachineName::new("m1"),
            cluster_ref: NamespacedName::new("default", cluster),
            provider_id: None,
            install_image: InstallImage {
                name: "img".into(),
                url: "http://x".into(),
                post_install_user_data_partition_label: None,
            },
            ssh_spec: SshSpec {
                secret_ref: NamespacedName::new("default", "ssh"),
                port_after_install_image: 22,
                port_after_cloud_init: 22,
            },
            selector: HostSelector::default(),
            user_data_secret_ref: NamespacedName::new("default", "user-data"),
            deletion_requested: false,
        }
    }

    #[test]
    fn bound_host_is_not_a_candidate() {
        let mut h = host("h1", "c1");
        h.consumer_ref = Some(ConsumerRef::new("default", "other-machine"));
        assert!(!is_candidate(&h, &machine("c1")));
    }

    #[test]
    fn maintenance_host_is_not_a_candidate() {
        let mut h = host("h1", "c1");
        h.maintenance = true;
        assert!(!is_candidate(&h, &machine("c1")));
    }

    #[test]
    fn permanent_error_host_is_not_a_candidate() {
        let mut h = host("h1", "c1");
        h.status.permanent_error = true;
        assert!(!is_candidate(&h, &machine("c1")));
    }

    #[test]
    fn cluster_mismatch_is_not_a_candidate() {
        let h = host("h1", "c1");
        assert!(!is_candidate(&h, &machine("c2")));
    }

    #[test]
    fn picks_least_recently_provisioned_among_candidates() {
        let mut h1 = host("h1", "c1");
        h1.status.last_provisioned_at = Some(chrono::Utc::now());
        let h2 = host("h2", "c1");
        let hosts = vec![h1, h2];
        let picked = pick_host(&hosts, &machine("c1")).unwrap();
        assert_eq!(picked.name.as_str(), "h2");
    }

    #[test]
    fn no_candidates_returns_none() {
        let hosts = vec![host("h1", "other")];
        assert!(pick_host(&hosts, &machine("c1")).is_none());
    }
}
