/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::time::Instant;

// Custom function to get the number of CPUs without using the num_cpus crate
pub fn get_num_cpus() -> usize {
    // For Unix-like systems
    #[cfg(unix)]
    {
        unsafe {
            let cpus = libc::sysconf(libc::_SC_NPROCESSORS_ONLN);
            if cpus > 0 {
                cpus as usize
            } else {
                1 // Fallback to 1 if sysconf fails
            }
        }
    }

    // For Windows systems
    #[cfg(windows)]
    {
        use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};
        unsafe {
            let mut sysinfo: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut sysinfo);
            (sysinfo.dwNumberOfProcessors as usize).max(1)
        }
    }

    // Fallback for other platforms
    #[cfg(not(any(unix, windows)))]
    {
        1
    }
}

/// `numerator / denominator`, or 0 when the denominator is not positive
#[inline]
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Clamps into `[0, 1]`, mapping NaN to 0
#[inline]
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.map_or(false, |d| Instant::now() >= d)
}
