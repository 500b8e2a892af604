//! `opfs-sanity-check` (spec.md §6.3) run against a freshly installed pool.

use opfs_vfs::export::{install_sahpool, sanity_check, BrowserOsCallback};
use opfs_vfs::vfs::sahpool::SAHPoolConfigBuilder;
use wasm_bindgen_test::wasm_bindgen_test;

#[wasm_bindgen_test]
async fn sanity_check_passes_against_a_fresh_pool() {
    let vfs_name = "opfs-sahpool-sanity";
    let cfg = SAHPoolConfigBuilder::new()
        .vfs_name(vfs_name)
        .directory(&format!(".{vfs_name}"))
        .clear_on_init(true)
        .default_capacity(6)
        .build();
    let _pool = install_sahpool::<BrowserOsCallback>(&cfg, false)
        .await
        .expect("install");

    sanity_check(vfs_name, "/sanity.db").expect("sanity check should pass on a fresh pool");
}
