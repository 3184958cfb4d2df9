//! Resource descriptors

use core::fmt;

use bitflags::bitflags;

bitflags! {
    /// What a client may do with a resource
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u8 {
        const READABLE = 0b0000_0001;
        const WRITABLE = 0b0000_0010;
        const BROADCAST = 0b0000_0100;
    }
}

/// Named endpoint exposed by a component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resource {
    pub name: &'static str,
    pub flags: ResourceFlags,
    pub help: &'static str,
}

impl Resource {
    pub const fn new(name: &'static str, flags: ResourceFlags, help: &'static str) -> Self {
        Self { name, flags, help }
    }

    /// Broadcast key of this resource when owned by `component`
    pub fn key(&self, component: &str) -> String {
        format!("{}/{}", component, self.name)
    }

    pub fn is_readable(&self) -> bool {
        self.flags.contains(ResourceFlags::READABLE)
    }

    pub fn is_writable(&self) -> bool {
        self.flags.contains(ResourceFlags::WRITABLE)
    }

    pub fn is_broadcast(&self) -> bool {
        self.flags.contains(ResourceFlags::BROADCAST)
    }
}

impl fmt::Display for Resource {
    /// `name  rwb` listing, dashes for missing capabilities
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = if self.is_readable() { 'r' } else { '-' };
        let w = if self.is_writable() { 'w' } else { '-' };
        let b = if self.is_broadcast() { 'b' } else { '-' };
        write!(f, "{:<10} {}{}{}", self.name, r, w, b)
    }
}
