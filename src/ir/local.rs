//! Spill locals: slots in the guest-context frame handed out by RA when a
//! value cannot be kept in a host register.

use super::types::Type;

#[derive(Debug, Clone, Copy)]
pub struct LocalData {
    pub ty: Type,
    /// Byte offset within the guest-context frame.
    pub offset: i32,
}
