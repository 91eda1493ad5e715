//! Mount handling for the node agent.
//!
//! This module handles:
//! - Mount point detection from `/proc/self/mountinfo`
//! - The tmpfs that backs every volume
//! - Read-only bind mounts into pod target paths

mod mountinfo;
mod mounts;

pub use mountinfo::{MountInfoEntry, is_mount_point, is_mount_point_in, parse_mountinfo};
pub use mounts::{Mounter, SystemMounter};
