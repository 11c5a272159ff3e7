//! Address pools and subnet selection.

use ipnet::Ipv4Net;
use nodegate_common::Role;
use nodegate_common::constants::pools;
use std::net::Ipv4Addr;

use super::AllocError;

/// A role's base pool, partitioned into fixed-size subnets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSpec {
    /// Role this pool serves
    pub role: Role,
    /// Range subnets are carved from
    pub base: Ipv4Net,
    /// Prefix length of every assigned subnet
    pub prefix: u8,
    /// Never hand out the first subnet of the pool
    pub reserve_first: bool,
    /// Cluster addresses are numbered inside this block instead of the subnet
    pub cluster_block: Option<Ipv4Net>,
}

impl PoolSpec {
    pub fn new(
        role: Role,
        base: Ipv4Net,
        prefix: u8,
        reserve_first: bool,
        cluster_block: Option<Ipv4Net>,
    ) -> Result<Self, AllocError> {
        if prefix < base.prefix_len() || prefix > 32 {
            return Err(AllocError::InvalidPool(format!(
                "{} pool {}: subnet prefix /{} must be between /{} and /32",
                role,
                base,
                prefix,
                base.prefix_len()
            )));
        }

        Ok(Self {
            role,
            base: base.trunc(),
            prefix,
            reserve_first,
            cluster_block: cluster_block.map(|b| b.trunc()),
        })
    }

    /// Built-in pool for a role
    pub fn default_for(role: Role) -> Self {
        match role {
            Role::ControlPlane => Self {
                role,
                base: pools::CONTROL_PLANE_BASE,
                prefix: pools::CONTROL_PLANE_PREFIX,
                reserve_first: false,
                cluster_block: Some(pools::CONTROL_PLANE_CLUSTER_BLOCK),
            },
            Role::Worker => Self {
                role,
                base: pools::WORKER_BASE,
                prefix: pools::WORKER_PREFIX,
                reserve_first: true,
                cluster_block: None,
            },
        }
    }

    /// All subnets of the pool in address order
    pub fn subnets(&self) -> impl Iterator<Item = Ipv4Net> + '_ {
        self.base.subnets(self.prefix).into_iter().flatten()
    }

    /// First subnet that is not reserved and overlaps nothing in `used`
    pub fn next_free<'a, I>(&self, used: I) -> Option<Ipv4Net>
    where
        I: IntoIterator<Item = &'a Ipv4Net>,
    {
        let used: Vec<&Ipv4Net> = used.into_iter().collect();
        let skip = usize::from(self.reserve_first);

        self.subnets()
            .skip(skip)
            .find(|candidate| !used.iter().any(|u| overlaps(candidate, u)))
    }

    /// Cluster address for a subnet of this pool
    pub fn cluster_address(&self, subnet: &Ipv4Net) -> Ipv4Addr {
        match self.cluster_block {
            Some(block) => {
                let offset = subnet.network().octets()[3];
                Ipv4Addr::from(u32::from(block.network()) + u32::from(offset))
            }
            None => subnet.network(),
        }
    }
}

fn overlaps(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn test_default_pools() {
        let cp = PoolSpec::default_for(Role::ControlPlane);
        assert_eq!(cp.base, net("10.244.0.0/26"));
        assert_eq!(cp.prefix, 26);
        assert_eq!(cp.cluster_block, Some(net("10.244.0.0/24")));
        assert!(!cp.reserve_first);

        let worker = PoolSpec::default_for(Role::Worker);
        assert_eq!(worker.base, net("10.244.0.0/16"));
        assert_eq!(worker.prefix, 24);
        assert_eq!(worker.cluster_block, None);
        assert!(worker.reserve_first);
    }

    #[test]
    fn test_worker_skips_reserved_first_subnet() {
        let pool = PoolSpec::default_for(Role::Worker);
        assert_eq!(pool.next_free(&[]), Some(net("10.244.1.0/24")));
    }

    #[test]
    fn test_role_scoped_pool_without_reservation() {
        let pool = PoolSpec::new(Role::Worker, net("10.244.1.0/24"), 24, false, None).unwrap();
        assert_eq!(pool.next_free(&[]), Some(net("10.244.1.0/24")));
        assert_eq!(pool.next_free(&[net("10.244.1.0/24")]), None);
    }

    #[test]
    fn test_skips_used_and_overlapping() {
        let pool = PoolSpec::default_for(Role::Worker);
        let used = [net("10.244.1.0/24"), net("10.244.2.128/25")];
        assert_eq!(pool.next_free(&used), Some(net("10.244.3.0/24")));
    }

    #[test]
    fn test_control_plane_cluster_address_offset() {
        let pool = PoolSpec::new(
            Role::ControlPlane,
            net("10.244.0.0/24"),
            26,
            false,
            Some(net("10.244.0.0/24")),
        )
        .unwrap();
        let second = pool.subnets().nth(1).unwrap();
        assert_eq!(second, net("10.244.0.64/26"));
        assert_eq!(pool.cluster_address(&second), Ipv4Addr::new(10, 244, 0, 64));
    }

    #[test]
    fn test_worker_cluster_address_is_network() {
        let pool = PoolSpec::default_for(Role::Worker);
        assert_eq!(
            pool.cluster_address(&net("10.244.7.0/24")),
            Ipv4Addr::new(10, 244, 7, 0)
        );
    }

    #[test]
    fn test_invalid_prefix_rejected() {
        assert!(PoolSpec::new(Role::Worker, net("10.244.0.0/16"), 12, true, None).is_err());
        assert!(PoolSpec::new(Role::Worker, net("10.244.0.0/16"), 33, true, None).is_err());
    }
}
