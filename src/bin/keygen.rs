// Copyright (c) 2026 Orbitfs
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Generate a P-256 reference owner key and print its reference id.

use anyhow::Result;
use std::path::PathBuf;

use orbitfs::core::crypto::hash_json;
use orbitfs::core::crypto::identity::{generate_private, marshal_private, marshal_public};

fn main() -> Result<()> {
    let out_dir = std::env::args().nth(1).unwrap_or_else(|| "data".to_string());
    let mut key_path = PathBuf::from(out_dir);
    std::fs::create_dir_all(&key_path)?;
    key_path.push("owner.pem");

    let key = generate_private();
    let private_pem = marshal_private(&key)?;
    std::fs::write(&key_path, private_pem.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600));
    }

    let public_pem = marshal_public(key.verifying_key())?;
    println!("{}", hash_json(&public_pem)?);
    Ok(())
}
