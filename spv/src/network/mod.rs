//! Peer-to-peer networking: connections, handshake, peers, address book,
//! bans, and the outbound connection manager.

pub mod address_book;
pub mod ban;
pub mod connection;
pub mod constants;
pub mod discovery;
pub mod handshake;
pub mod manager;
pub mod peer;

pub use address_book::AddressBook;
pub use ban::{BanManager, Misbehavior};
pub use connection::Connection;
pub use manager::NetworkManager;
pub use peer::{Peer, PeerEvent};
