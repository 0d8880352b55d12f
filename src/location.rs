//! Registered-user location table
//!
//! A fixed roster of provisioned softphone accounts, seeded at startup
//! and mutated only by REGISTER handling. Lookups take a snapshot of the
//! entry; a concurrent REGISTER simply wins the race over the address.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Mutex;

/// One provisioned user record
#[derive(Debug, Clone, PartialEq)]
pub struct LocationEntry {
    pub username: String,
    /// Carried for future digest authentication, never validated
    pub password: String,
    pub ip: IpAddr,
    pub port: u16,
    pub realm: String,
    pub registered: bool,
}

impl LocationEntry {
    fn seeded(username: &str, password: &str, ip: [u8; 4], port: u16, realm: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            ip: IpAddr::V4(Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3])),
            port,
            realm: realm.to_string(),
            registered: false,
        }
    }

    /// Transport address this user was last registered from
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// The provisioned roster: only these usernames may register
fn seed_entries() -> Vec<LocationEntry> {
    vec![
        LocationEntry::seeded("1001", "1001pass", [192, 168, 1, 101], 5060, "tinysip"),
        LocationEntry::seeded("1002", "1002pass", [192, 168, 1, 102], 5060, "tinysip"),
        LocationEntry::seeded("1003", "1003pass", [192, 168, 1, 103], 5060, "tinysip"),
        LocationEntry::seeded("1004", "1004pass", [192, 168, 1, 104], 5060, "tinysip"),
    ]
}

/// Location table keyed by numeric username
pub struct LocationTable {
    entries: Mutex<Vec<LocationEntry>>,
}

impl Default for LocationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationTable {
    /// Create a table holding the embedded seed roster
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(seed_entries()),
        }
    }

    /// Create a table from an explicit roster
    pub fn with_entries(entries: Vec<LocationEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Linear search by exact username; returns a snapshot of the entry
    pub fn find(&self, username: &str) -> Option<LocationEntry> {
        let entries = self.entries.lock().unwrap();
        entries.iter().find(|e| e.username == username).cloned()
    }

    /// Overwrite a user's transport address and mark it registered.
    /// Returns the updated snapshot, or `None` for an unknown username.
    pub fn register(&self, username: &str, addr: SocketAddr) -> Option<LocationEntry> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.iter_mut().find(|e| e.username == username)?;
        entry.ip = addr.ip();
        entry.port = addr.port();
        entry.registered = true;
        Some(entry.clone())
    }

    /// Number of provisioned users
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_users_resolve() {
        let table = LocationTable::new();
        let entry = table.find("1001").unwrap();
        assert_eq!(entry.username, "1001");
        assert!(!entry.registered);
        assert!(table.find("9999").is_none());
    }

    #[test]
    fn test_register_overwrites_address() {
        let table = LocationTable::new();
        let addr: SocketAddr = "10.0.0.5:5062".parse().unwrap();

        let updated = table.register("1001", addr).unwrap();
        assert_eq!(updated.addr(), addr);
        assert!(updated.registered);

        // Re-registering with the same address leaves the entry identical.
        let again = table.register("1001", addr).unwrap();
        assert_eq!(again, updated);

        // No other entry was touched.
        assert!(!table.find("1002").unwrap().registered);
    }

    #[test]
    fn test_register_unknown_user() {
        let table = LocationTable::new();
        let addr: SocketAddr = "10.0.0.5:5062".parse().unwrap();
        assert!(table.register("9999", addr).is_none());
    }
}
