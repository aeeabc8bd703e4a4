//! PrismDB - an encrypted, versioned key-value store
//!
//! Every value is framed with its write time, encrypted under the
//! database's own RSA keypair and stored in a content-addressed object
//! store. Each mutation yields a new immutable root, so every past head
//! stays readable. Heads are published under the database's peer identity
//! and mutations can be replicated live to other holders of the keypair.
//!
//! # Example
//!
//! ```no_run
//! use prismdb::db::Database;
//!
//! let mut db = Database::open("./my_store").unwrap();
//! db.create("inventory", 2048).unwrap();
//! db.set("color", b"blue").unwrap();
//! db.save().unwrap();
//! assert_eq!(db.get("color").unwrap().payload, b"blue");
//! ```

pub mod crypto;
pub mod db;
pub mod storage;
pub mod sync;
