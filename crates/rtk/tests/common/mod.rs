//! Shared setup for the kernel integration suites.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use rtk::{HostPort, Kernel, KernelConfig};

pub type TestKernel = Arc<Kernel<HostPort>>;

/// Kernel on a fast-forwarding host port with integrity checks on every
/// switch.
pub fn kernel() -> TestKernel {
    kernel_with(KernelConfig::builder().integrity_checks(true).build())
}

pub fn kernel_with(config: KernelConfig) -> TestKernel {
    Kernel::builder(HostPort::new())
        .config(config)
        .start()
        .expect("start kernel")
}

/// Kernel whose time only moves through explicit ticks.
pub fn ticked_kernel(config: KernelConfig) -> TestKernel {
    Kernel::builder(HostPort::with_fast_forward(false))
        .config(config)
        .start()
        .expect("start kernel")
}

/// Ordered record of what the threads under test did.
#[derive(Clone)]
pub struct Recorder<T>(Arc<Mutex<Vec<T>>>);

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn push(&self, entry: T) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }
}
