//! Bridge facade
//!
//! `Bridge` pairs a configuration with the marshalling operations so callers
//! do not thread a `BridgeConfig` through every call. It holds no guest
//! state: the same bridge can serve any number of evaluation contexts.

use crate::config::{BridgeConfig, ConfigError};
use crate::error::Result;
use crate::extractor;
use crate::host::HostValue;
use crate::pusher;
use stackbridge_core::{GuestStack, MULTRET};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct Bridge {
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Bridge { config }
    }

    /// Create a bridge from a TOML configuration file
    pub fn from_config_file(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        Ok(Self::new(BridgeConfig::load(path)?))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Push one host value
    pub fn push<S: GuestStack + ?Sized>(&self, stack: &mut S, value: &HostValue) -> Result<()> {
        pusher::push(stack, value, &self.config)
    }

    /// Push several host values, all or none
    pub fn push_all<S: GuestStack + ?Sized>(
        &self,
        stack: &mut S,
        values: &[HostValue],
    ) -> Result<()> {
        pusher::push_all(stack, values, &self.config)
    }

    /// Read the value at `idx` without popping it
    pub fn extract<S: GuestStack + ?Sized>(&self, stack: &mut S, idx: i32) -> Result<HostValue> {
        extractor::extract(stack, idx, &self.config)
    }

    /// Extract and pop the top `n` values
    pub fn extract_returns<S: GuestStack + ?Sized>(
        &self,
        stack: &mut S,
        n: usize,
    ) -> Result<Vec<HostValue>> {
        extractor::extract_returns(stack, n, &self.config)
    }

    /// Store a host value as a guest global
    pub fn set_global<S: GuestStack + ?Sized>(
        &self,
        stack: &mut S,
        name: &str,
        value: &HostValue,
    ) -> Result<()> {
        let top = stack.top();
        self.push(stack, value)?;
        if let Err(e) = stack.set_global(name) {
            stack.set_top(top);
            return Err(e.into());
        }
        Ok(())
    }

    /// Read a guest global as a host value
    pub fn get_global<S: GuestStack + ?Sized>(&self, stack: &mut S, name: &str) -> Result<HostValue> {
        let top = stack.top();
        stack.check_stack(1)?;
        stack.get_global(name)?;
        let value = self.extract(stack, -1);
        stack.set_top(top);
        value
    }

    /// Call the guest function on top of the stack with `args` and return
    /// all of its results.
    ///
    /// The function is consumed whether the call succeeds or fails.
    pub fn call<S: GuestStack + ?Sized>(
        &self,
        stack: &mut S,
        args: &[HostValue],
    ) -> Result<Vec<HostValue>> {
        let base = stack.top() - 1;
        let result = self.call_inner(stack, base, args);
        if result.is_err() {
            stack.set_top(base.max(0));
        }
        result
    }

    /// Call the guest global `name` with `args`
    pub fn call_global<S: GuestStack + ?Sized>(
        &self,
        stack: &mut S,
        name: &str,
        args: &[HostValue],
    ) -> Result<Vec<HostValue>> {
        stack.check_stack(1)?;
        stack.get_global(name)?;
        self.call(stack, args)
    }

    fn call_inner<S: GuestStack + ?Sized>(
        &self,
        stack: &mut S,
        base: i32,
        args: &[HostValue],
    ) -> Result<Vec<HostValue>> {
        self.push_all(stack, args)?;
        stack.call(args.len() as i32, MULTRET)?;
        let returned = (stack.top() - base).max(0) as usize;
        debug!(args = args.len(), returned, "guest call returned");
        self.extract_returns(stack, returned)
    }
}
