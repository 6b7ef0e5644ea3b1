//! Decides who serves a device id.

use crate::config::RouterConfig;

/// First and last disk drive device ids; unit = id - 0x30
pub const DISK_FIRST: u8 = 0x31;
pub const DISK_LAST: u8 = 0x3F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Relay,
    LocalStorage(u8),
    Unhandled,
}

/// Route one transaction. Re-evaluate for every command frame: the peer
/// may come and go between transactions.
pub fn route(
    device_id: u8,
    config: &RouterConfig,
    connected: bool,
    has_local: impl Fn(u8) -> bool,
) -> Route {
    if device_id == config.relay_device {
        return if connected { Route::Relay } else { Route::Unhandled };
    }
    if !(DISK_FIRST..=DISK_LAST).contains(&device_id) {
        return Route::Unhandled;
    }

    let unit = device_id - 0x30;
    if config.delegated_units.contains(&unit) {
        if connected {
            Route::Relay
        } else {
            Route::Unhandled
        }
    } else if has_local(unit) {
        Route::LocalStorage(unit)
    } else {
        Route::Unhandled
    }
}
