// Copyright 2023 Greptime Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use common_telemetry::info;
use common_test_util::temp_dir::create_temp_dir;
use object_store::services::{Azblob, Fs};
use object_store::test_util::{azblob_test_config, TempFolder};
use object_store::util::collect;
use object_store::{EntryMode, ObjectStore};

async fn test_streamed_write(store: &ObjectStore) -> Result<()> {
    let file_name = "20240101T000000Z-abc";
    let mut writer = store.writer_with(file_name).chunk(8 * 1024 * 1024).await?;
    for i in 0..4u8 {
        writer.write(vec![i; 1024]).await?;
    }
    writer.close().await?;

    let content = store.read(file_name).await?.to_vec();
    assert_eq!(4096, content.len());
    assert_eq!(0, content[0]);
    assert_eq!(3, content[4095]);

    let entries = collect(store.lister("/").await?)
        .await?
        .into_iter()
        .filter(|x| x.metadata().mode() == EntryMode::FILE)
        .collect::<Vec<_>>();
    assert_eq!(1, entries.len());
    assert_eq!(file_name, entries[0].path());

    store.delete(file_name).await?;
    Ok(())
}

async fn test_aborted_write(store: &ObjectStore) -> Result<()> {
    let file_name = "20240101T000000Z-aborted";
    let mut writer = store.writer_with(file_name).chunk(8 * 1024 * 1024).await?;
    writer.write(vec![1u8; 1024]).await?;
    writer.abort().await?;

    assert!(!store.exists(file_name).await?);
    Ok(())
}

#[tokio::test]
async fn test_fs_backend() -> Result<()> {
    let data_dir = create_temp_dir("test_fs_backend");
    let tmp_dir = create_temp_dir("test_fs_backend");
    let builder = Fs::default()
        .root(&data_dir.path().to_string_lossy())
        .atomic_write_dir(&tmp_dir.path().to_string_lossy());

    let store = ObjectStore::new(builder)?.finish();

    test_streamed_write(&store).await?;
    test_aborted_write(&store).await?;

    Ok(())
}

#[tokio::test]
async fn test_azblob_backend() -> Result<()> {
    common_telemetry::init_default_ut_logging();
    if let Some(config) = azblob_test_config() {
        info!("Running azblob test.");

        let root = uuid::Uuid::new_v4().to_string();

        let builder = Azblob::default()
            .root(&root)
            .endpoint(&config.endpoint)
            .account_name(&config.account_name)
            .account_key(&config.account_key)
            .container(&config.container);

        let store = ObjectStore::new(builder)?.finish();

        let guard = TempFolder::new(&store, "/");
        test_streamed_write(&store).await?;
        guard.remove_all().await?;
    }
    Ok(())
}
