// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::guardian::Guardian;
use crate::instance_map::InstanceMap;
use crate::thread_registry::ThreadRegistry;
use crate::user_map::UserMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Version string announced in the greeting.
pub const SERVER_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-instance-manager");

/// Everything a connection handler needs, built once by the manager and
/// shared by reference.
pub struct Context {
    pub instance_map: Arc<InstanceMap>,
    pub guardian: Arc<Guardian>,
    pub registry: Arc<ThreadRegistry>,
    pub users: UserMap,
    /// Idle time after which a client connection is dropped.
    pub wait_timeout: Duration,
    connection_ids: AtomicU32,
}

impl Context {
    pub fn new(
        instance_map: Arc<InstanceMap>,
        guardian: Arc<Guardian>,
        registry: Arc<ThreadRegistry>,
        users: UserMap,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            instance_map,
            guardian,
            registry,
            users,
            wait_timeout,
            connection_ids: AtomicU32::new(1),
        }
    }

    pub fn next_connection_id(&self) -> u32 {
        self.connection_ids.fetch_add(1, Ordering::Relaxed)
    }
}
