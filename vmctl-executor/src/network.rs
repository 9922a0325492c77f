//! Per-VM network identity allocation.
//!
//! Every VM gets a private tap device and a /30 point-to-point subnet:
//!
//! ```text
//! slot i:  tap   = <prefix><i>
//!          host  = base + 4i + 1   (tap side, gateway)
//!          guest = base + 4i + 2
//!          mask  = 255.255.255.252
//! ```
//!
//! Slots are released when the [`NetworkLease`] is dropped.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use crate::config::NetworkConfig;
use crate::ExecutorError;

/// Netmask of every per-VM subnet.
pub const SLOT_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 252);

const SLOT_SIZE: u32 = 4;

/// Thread-safe allocator of tap devices and guest addresses.
#[derive(Debug, Clone)]
pub struct NetworkPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    config: NetworkConfig,
    in_use: Mutex<BTreeSet<u16>>,
}

impl PoolInner {
    fn release(&self, slot: u16) {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.in_use.lock().expect("network pool lock poisoned").remove(&slot);
    }
}

impl NetworkPool {
    /// Create a pool from the given configuration.
    ///
    /// # Errors
    /// Returns [`ExecutorError::InvalidConfig`] if the base address is not
    /// 4-aligned, the capacity is zero, or the pool would run past
    /// `255.255.255.255`.
    pub fn new(config: NetworkConfig) -> Result<Self, ExecutorError> {
        let base = u32::from(config.base);
        if base % SLOT_SIZE != 0 {
            return Err(ExecutorError::InvalidConfig(format!(
                "network base {} is not aligned to a /30 boundary",
                config.base
            )));
        }
        if config.capacity == 0 {
            return Err(ExecutorError::InvalidConfig("network capacity must be positive".to_owned()));
        }
        if base.checked_add(u32::from(config.capacity) * SLOT_SIZE - 1).is_none() {
            return Err(ExecutorError::InvalidConfig(format!(
                "{} slots starting at {} overflow the IPv4 space",
                config.capacity, config.base
            )));
        }
        Ok(Self {
            inner: Arc::new(PoolInner { config, in_use: Mutex::new(BTreeSet::new()) }),
        })
    }

    /// Reserve the lowest free slot.
    ///
    /// # Errors
    /// Returns [`ExecutorError::NetworkExhausted`] if every slot is leased.
    ///
    /// # Panics
    /// Panics if the internal `Mutex` is poisoned.
    pub fn allocate(&self) -> Result<NetworkLease, ExecutorError> {
        let config = &self.inner.config;
        let slot = {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut in_use = self.inner.in_use.lock().expect("network pool lock poisoned");
            let slot = (0..config.capacity)
                .find(|slot| !in_use.contains(slot))
                .ok_or(ExecutorError::NetworkExhausted { capacity: config.capacity })?;
            in_use.insert(slot);
            slot
        };

        let subnet = u32::from(config.base) + u32::from(slot) * SLOT_SIZE;
        Ok(NetworkLease {
            slot,
            tap_device: format!("{}{slot}", config.tap_prefix),
            gateway: Ipv4Addr::from(subnet + 1),
            guest_ip: Ipv4Addr::from(subnet + 2),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Number of slots currently leased.
    ///
    /// # Panics
    /// Panics if the internal `Mutex` is poisoned.
    #[must_use]
    pub fn leased(&self) -> usize {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.inner.in_use.lock().expect("network pool lock poisoned").len()
    }
}

/// Exclusive claim on one tap device and /30 subnet.
#[derive(Debug)]
pub struct NetworkLease {
    slot: u16,
    tap_device: String,
    gateway: Ipv4Addr,
    guest_ip: Ipv4Addr,
    pool: Arc<PoolInner>,
}

impl NetworkLease {
    #[must_use]
    pub fn slot(&self) -> u16 {
        self.slot
    }

    #[must_use]
    pub fn tap_device(&self) -> &str {
        &self.tap_device
    }

    /// Host-side address of the tap device.
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    #[must_use]
    pub fn guest_ip(&self) -> Ipv4Addr {
        self.guest_ip
    }

    /// Kernel `ip=` parameter configuring the guest's `eth0` statically.
    #[must_use]
    pub fn kernel_ip_param(&self, hostname: &str) -> String {
        format!("ip={}::{}:{SLOT_NETMASK}:{hostname}:eth0:off", self.guest_ip, self.gateway)
    }
}

impl Drop for NetworkLease {
    fn drop(&mut self) {
        self.pool.release(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn pool(capacity: u16) -> NetworkPool {
        let config = NetworkConfig { capacity, ..NetworkConfig::default() };
        match NetworkPool::new(config) {
            Ok(p) => p,
            Err(e) => panic!("pool construction failed: {e}"),
        }
    }

    #[test]
    fn first_lease_uses_slot_zero_addresses() {
        let pool = pool(4);
        let lease = match pool.allocate() {
            Ok(l) => l,
            Err(e) => panic!("allocate failed: {e}"),
        };
        assert_eq!(lease.slot(), 0);
        assert_eq!(lease.tap_device(), "vmtap0");
        assert_eq!(lease.gateway(), Ipv4Addr::new(172, 20, 0, 1));
        assert_eq!(lease.guest_ip(), Ipv4Addr::new(172, 20, 0, 2));
        assert_eq!(
            lease.kernel_ip_param("vm1"),
            "ip=172.20.0.2::172.20.0.1:255.255.255.252:vm1:eth0:off"
        );
    }

    #[test]
    fn exhausted_pool_reports_capacity() {
        let pool = pool(2);
        let _a = pool.allocate();
        let _b = pool.allocate();
        assert!(matches!(pool.allocate(), Err(ExecutorError::NetworkExhausted { capacity: 2 })));
    }

    #[test]
    fn dropping_a_lease_frees_its_slot() {
        let pool = pool(1);
        let lease = pool.allocate();
        assert!(lease.is_ok());
        assert_eq!(pool.leased(), 1);
        drop(lease);
        assert_eq!(pool.leased(), 0);
        let again = match pool.allocate() {
            Ok(l) => l,
            Err(e) => panic!("slot should have been released: {e}"),
        };
        assert_eq!(again.slot(), 0);
    }

    #[test]
    fn misaligned_base_is_rejected() {
        let config = NetworkConfig { base: Ipv4Addr::new(10, 0, 0, 1), ..NetworkConfig::default() };
        assert!(matches!(NetworkPool::new(config), Err(ExecutorError::InvalidConfig(_))));
    }

    #[test]
    fn pool_past_address_space_is_rejected() {
        let config = NetworkConfig {
            base: Ipv4Addr::new(255, 255, 255, 0),
            capacity: 128,
            ..NetworkConfig::default()
        };
        assert!(matches!(NetworkPool::new(config), Err(ExecutorError::InvalidConfig(_))));
    }

    #[test]
    fn concurrent_allocations_never_collide() {
        let pool = pool(64);
        let handles: Vec<_> = (0..64)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || pool.allocate())
            })
            .collect();

        let leases: Vec<NetworkLease> = handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(Ok(lease)) => lease,
                Ok(Err(e)) => panic!("allocation failed: {e}"),
                Err(_) => panic!("allocation thread panicked"),
            })
            .collect();

        let taps: HashSet<_> = leases.iter().map(|l| l.tap_device().to_owned()).collect();
        let ips: HashSet<_> = leases.iter().map(NetworkLease::guest_ip).collect();
        assert_eq!(taps.len(), 64, "tap devices must be unique");
        assert_eq!(ips.len(), 64, "guest IPs must be unique");
    }

    proptest::proptest! {
        #[test]
        fn proptest_live_leases_are_disjoint(ops in proptest::collection::vec(proptest::prelude::any::<bool>(), 1..64usize)) {
            let pool = pool(16);
            let mut live: Vec<NetworkLease> = Vec::new();
            for allocate in ops {
                if allocate {
                    if let Ok(lease) = pool.allocate() {
                        live.push(lease);
                    }
                } else if !live.is_empty() {
                    live.remove(0);
                }
                let slots: HashSet<u16> = live.iter().map(NetworkLease::slot).collect();
                proptest::prop_assert_eq!(slots.len(), live.len());
                proptest::prop_assert_eq!(pool.leased(), live.len());
            }
        }
    }
}
