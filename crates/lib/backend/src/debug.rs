// Copyright (C) 2023 gigablaster

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use ash::vk;
use log::{debug, error, info, warn};
use parking_lot::RwLock;

pub type DebugCallback = Box<dyn Fn(vk::DebugReportFlagsEXT, &str) + Send + Sync>;

/// Side channel for everything that isn't allowed to fail loudly.
///
/// Unsupported features, driver errors and validation findings are reported here and
/// the offending operation is skipped. Every message also goes to the `log` facade.
#[derive(Default)]
pub struct DebugReporter {
    callbacks: RwLock<Vec<(vk::DebugReportFlagsEXT, DebugCallback)>>,
}

impl DebugReporter {
    pub fn register(&self, flags: vk::DebugReportFlagsEXT, callback: DebugCallback) {
        self.callbacks.write().push((flags, callback));
    }

    pub fn report(&self, severity: vk::DebugReportFlagsEXT, message: &str) {
        if severity.contains(vk::DebugReportFlagsEXT::ERROR) {
            error!("{}", message);
        } else if severity.intersects(
            vk::DebugReportFlagsEXT::WARNING | vk::DebugReportFlagsEXT::PERFORMANCE_WARNING,
        ) {
            warn!("{}", message);
        } else if severity.contains(vk::DebugReportFlagsEXT::INFORMATION) {
            info!("{}", message);
        } else {
            debug!("{}", message);
        }
        self.callbacks
            .read()
            .iter()
            .filter(|(flags, _)| flags.intersects(severity))
            .for_each(|(_, callback)| callback(severity, message));
    }

    pub fn error(&self, message: &str) {
        self.report(vk::DebugReportFlagsEXT::ERROR, message);
    }

    pub fn warning(&self, message: &str) {
        self.report(vk::DebugReportFlagsEXT::WARNING, message);
    }

    pub fn performance(&self, message: &str) {
        self.report(vk::DebugReportFlagsEXT::PERFORMANCE_WARNING, message);
    }

    pub fn info(&self, message: &str) {
        self.report(vk::DebugReportFlagsEXT::INFORMATION, message);
    }
}

impl std::fmt::Debug for DebugReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugReporter")
            .field("callbacks", &self.callbacks.read().len())
            .finish()
    }
}
