// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

/// Guest hypervisor interfaces for nested virtualization acceleration.
pub mod nacl;
