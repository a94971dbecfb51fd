// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # rete-engine
//!
//! An incremental pattern-matching core for forward-chaining production
//! rules. A session keeps the set of rule activations that hold over its
//! fact base up to date under insert, update and retract, by propagating
//! deltas through a RETE network instead of re-evaluating rules.
//!
//! ## Architecture
//!
//! - **Facts** (`fact`, `store`): identity-bearing values and the session's fact base
//! - **Network** (`network`): alpha filters, joins, negation/existence,
//!   group-by and filter nodes wired in a `petgraph` graph
//! - **Tokens** (`token`): partial matches in an arena, with read-only views for conditions
//! - **Agenda** (`agenda`): pending activations in conflict-resolution order
//! - **Session** (`session`): mutation entry points and the firing loop
//!
//! ## Library usage
//!
//! ```no_run
//! use rete_engine::fact::{Fact, FactId};
//! use rete_engine::network::{JoinCondition, NetworkBuilder};
//! use rete_engine::rule::Rule;
//! use rete_engine::session::Session;
//!
//! let mut b = NetworkBuilder::new();
//! let root = b.root();
//! let orders = b.alpha_where("Order", |f| f.get("total").as_int() > Some(100));
//! let join = b.join(root, orders, JoinCondition::always()).unwrap();
//! b.terminal(join, Rule::new("large order", |_, m| {
//!     println!("{:?}", m.fact(0));
//!     Ok(())
//! }))
//! .unwrap();
//!
//! let mut session = Session::with_defaults(b.build()).unwrap();
//! let id = FactId::new(1).unwrap();
//! session.insert(Fact::new(id, "Order").with("total", 250_i64)).unwrap();
//! assert_eq!(session.fire().unwrap(), 1);
//! ```

pub mod agenda;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fact;
pub mod network;
pub mod rule;
pub mod session;
pub mod store;
pub mod token;
