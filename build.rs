// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use a vendored protoc so building this project doesn't require a system protoc install.
    let protoc_path = protoc_bin_vendored::protoc_bin_path()?;
    std::env::set_var("PROTOC", protoc_path);
    let well_known = protoc_bin_vendored::include_path()?;

    // The client half is used by the `client` module and the integration tests.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/pcbook.proto"], &[std::path::PathBuf::from("proto"), well_known])?;

    println!("cargo:rerun-if-changed=proto/pcbook.proto");
    Ok(())
}
