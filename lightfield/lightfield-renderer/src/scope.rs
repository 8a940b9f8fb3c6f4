//! Debug-group scope guard. Every pass pushes a labelled group on entry; `Drop` pops it on every exit path.

use std::ops::{Deref, DerefMut};

pub struct PassScope<'a> {
    encoder: &'a mut wgpu::CommandEncoder,
}

impl<'a> PassScope<'a> {
    pub fn new(encoder: &'a mut wgpu::CommandEncoder, label: &str) -> Self {
        encoder.push_debug_group(label);
        Self { encoder }
    }
}

impl Deref for PassScope<'_> {
    type Target = wgpu::CommandEncoder;

    fn deref(&self) -> &Self::Target {
        self.encoder
    }
}

impl DerefMut for PassScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.encoder
    }
}

impl Drop for PassScope<'_> {
    fn drop(&mut self) {
        self.encoder.pop_debug_group();
    }
}
