//! Minimal on-device test harness shared by the test runner binaries

// Not every runner uses every assertion
#![allow(dead_code)]

use core::fmt::Debug;

pub struct TestResults {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
}

impl TestResults {
    pub fn new() -> Self {
        Self {
            passed: 0,
            failed: 0,
            total: 0,
        }
    }

    pub fn assert(&mut self, condition: bool, test_name: &str) {
        self.total += 1;
        if condition {
            self.passed += 1;
            esp_println::println!("  ✓ {}", test_name);
        } else {
            self.failed += 1;
            esp_println::println!("  ✗ {} FAILED", test_name);
        }
    }

    pub fn assert_eq<T: PartialEq + Debug>(&mut self, left: T, right: T, test_name: &str) {
        self.total += 1;
        if left == right {
            self.passed += 1;
            esp_println::println!("  ✓ {}", test_name);
        } else {
            self.failed += 1;
            esp_println::println!("  ✗ {} FAILED: {:?} != {:?}", test_name, left, right);
        }
    }

    pub fn assert_close(&mut self, value: f32, expected: f32, tolerance: f32, test_name: &str) {
        self.total += 1;
        if (value - expected).abs() < tolerance {
            self.passed += 1;
            esp_println::println!("  ✓ {}", test_name);
        } else {
            self.failed += 1;
            esp_println::println!(
                "  ✗ {} FAILED: {:.2} not close to {:.2} (tolerance: {:.2})",
                test_name,
                value,
                expected,
                tolerance
            );
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    pub fn print_summary(&self) {
        esp_println::println!("\n==========================================");
        esp_println::println!("Test Summary:");
        esp_println::println!("  Total:  {}", self.total);
        esp_println::println!("  Passed: {}", self.passed);
        esp_println::println!("  Failed: {}", self.failed);
        if self.all_passed() {
            esp_println::println!("\n✓ ALL TESTS PASSED!");
        } else {
            esp_println::println!("\n✗ SOME TESTS FAILED");
        }
        esp_println::println!("==========================================");
    }
}

impl Default for TestResults {
    fn default() -> Self {
        Self::new()
    }
}
