// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::f64::consts;

use picodec_core::util::fixed::to_fixed;

/// For a given window size, generates the curve of the left-half of the window in Q31.
fn generate_win_curve(bs: usize) -> Box<[i32]> {
    let len = bs / 2;
    let denom = f64::from(len as u32);

    (0..len)
        .map(|i| {
            let num = f64::from(i as u32) + 0.5;
            let frac = consts::FRAC_PI_2 * (num / denom);
            to_fixed((consts::FRAC_PI_2 * frac.sin().powi(2)).sin(), 31)
        })
        .collect()
}

pub struct Windows {
    /// Short block window left-half curve.
    pub short: Box<[i32]>,
    /// Long block window left-half curve.
    pub long: Box<[i32]>,
}

impl Windows {
    pub fn new(blocksize0: usize, blocksize1: usize) -> Self {
        let short = generate_win_curve(blocksize0);
        let long = generate_win_curve(blocksize1);
        Windows { short, long }
    }

    /// Gets the left-half curve for a block size.
    pub fn slope(&self, bs: usize) -> &[i32] {
        if bs / 2 == self.short.len() {
            &self.short
        }
        else {
            &self.long
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_power_complementary() {
        let windows = Windows::new(64, 2048);

        for slope in [&windows.short, &windows.long] {
            let len = slope.len();

            for i in 0..len {
                let a = f64::from(slope[i]) / f64::from(1u32 << 31);
                let b = f64::from(slope[len - 1 - i]) / f64::from(1u32 << 31);

                assert!((a * a + b * b - 1.0).abs() < 1e-6, "i={}", i);
            }

            // Rising.
            assert!(slope.windows(2).all(|w| w[0] <= w[1]));
        }

        assert_eq!(windows.slope(64).len(), 32);
        assert_eq!(windows.slope(2048).len(), 1024);
    }
}
