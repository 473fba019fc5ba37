//! Path-driven virtual filesystem over the device registry: addresses a
//! device by (sanitised) friendlyName, then walks ContentDirectory
//! containers one path component at a time.
//!
//! Grounded in `vfs_p.h`'s nested matcher (`NPT_...Entry` / `GetEntry`
//! walk) and `content_dir.c`'s directory/object split, expressed here as a
//! `resolve` that returns either a directory's entries or a single file.

use std::sync::Arc;

use crate::{
    content_directory::BrowseResult,
    device::Device,
    didl::{clean_filename, DIDLObject},
    error::ControlPointError,
    registry::Registry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// One child of a resolved directory, lazily convertible to a [`DirEntry`]
/// (name/kind) or into the deeper [`Node`] it addresses.
enum Entry {
    DeviceDir(Arc<Device>),
    Debug(Arc<Device>),
    Object { device: Arc<Device>, didl: DIDLObject },
}

impl Entry {
    fn name(&self) -> String {
        match self {
            Entry::DeviceDir(d) => clean_filename(&d.friendly_name),
            Entry::Debug(_) => ".debug".to_owned(),
            Entry::Object { didl, .. } => didl.basename.clone(),
        }
    }

    fn is_dir(&self) -> bool {
        match self {
            Entry::DeviceDir(_) => true,
            Entry::Debug(_) => false,
            Entry::Object { didl, .. } => didl.is_container,
        }
    }

    fn into_dir_entry(self) -> DirEntry {
        let kind = if self.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        DirEntry {
            name: self.name(),
            kind,
        }
    }
}

/// A resolved file: either the synthesised `.debug` status dump, or a DIDL
/// object (an `item`, since `resolve` only ever returns a container as a
/// [`Resolved::Dir`]).
enum FileNode {
    Debug(Arc<Device>),
    Object { didl: DIDLObject },
}

enum Resolved {
    Dir(Vec<Entry>),
    File(FileNode),
}

/// Bytes behind an opened file: either already in hand, or a URL fetched on
/// first read.
#[derive(Debug, Clone)]
pub enum FileContent {
    Buffer(String),
    Url(String),
}

impl FileContent {
    /// Resolves to the underlying bytes, fetching `Url` contents through
    /// `client` on demand. Each call to a `Url` variant re-fetches; callers
    /// that read repeatedly should cache the result themselves.
    pub async fn bytes(&self, client: &reqwest::Client) -> anyhow::Result<Vec<u8>> {
        match self {
            FileContent::Buffer(s) => Ok(s.as_bytes().to_vec()),
            FileContent::Url(url) => Ok(client.get(url).send().await?.bytes().await?.to_vec()),
        }
    }
}

/// The resolver itself: holds the registry it walks and whether `.debug`
/// entries are exposed.
pub struct Vfs {
    registry: Arc<Registry>,
    debug: bool,
}

impl Vfs {
    pub fn new(registry: Arc<Registry>, debug: bool) -> Self {
        Self { registry, debug }
    }

    pub async fn stat(&self, path: &str) -> Result<Attributes, ControlPointError> {
        match self.resolve(path).await? {
            Resolved::Dir(entries) => {
                let subdirs = entries.iter().filter(|e| e.is_dir()).count();
                Ok(Attributes {
                    mode: 0o555,
                    nlink: 2 + subdirs as u32,
                    size: 512,
                })
            }
            Resolved::File(file) => {
                let size = match &file {
                    FileNode::Debug(device) => self.debug_content(device).len() as u64,
                    FileNode::Object { didl } => didl.element.len() as u64,
                };
                Ok(Attributes {
                    mode: 0o444,
                    nlink: 1,
                    size,
                })
            }
        }
    }

    /// `.`, `..`, then one entry per child, containers before items
    /// (inherited from Browse's server-order preservation).
    pub async fn list(&self, path: &str) -> Result<Vec<DirEntry>, ControlPointError> {
        match self.resolve(path).await? {
            Resolved::Dir(entries) => {
                let mut out = vec![
                    DirEntry {
                        name: ".".to_owned(),
                        kind: EntryKind::Directory,
                    },
                    DirEntry {
                        name: "..".to_owned(),
                        kind: EntryKind::Directory,
                    },
                ];
                out.extend(entries.into_iter().map(Entry::into_dir_entry));
                Ok(out)
            }
            Resolved::File(_) => Err(ControlPointError::NotADirectory(path.to_owned())),
        }
    }

    pub async fn open(&self, path: &str) -> Result<FileContent, ControlPointError> {
        match self.resolve(path).await? {
            Resolved::Dir(_) => Err(ControlPointError::InvalidArgument(format!(
                "{path} is a directory"
            ))),
            Resolved::File(FileNode::Debug(device)) => {
                Ok(FileContent::Buffer(self.debug_content(&device)))
            }
            Resolved::File(FileNode::Object { didl }) => match didl.res_url {
                Some(url) => Ok(FileContent::Url(url)),
                None => Ok(FileContent::Buffer(didl.element)),
            },
        }
    }

    fn debug_content(&self, device: &Arc<Device>) -> String {
        device.status_string()
    }

    async fn resolve(&self, path: &str) -> Result<Resolved, ControlPointError> {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();

        if components.is_empty() {
            let entries = self
                .registry
                .devices()
                .into_iter()
                .map(Entry::DeviceDir)
                .collect();
            return Ok(Resolved::Dir(entries));
        }

        let device_name = components[0];
        let device = self
            .registry
            .find_by_name(device_name)
            .ok_or_else(|| ControlPointError::NotFound(device_name.to_owned()))?;
        let rest = &components[1..];

        if rest.is_empty() {
            return Ok(Resolved::Dir(self.device_root_entries(&device).await?));
        }

        if rest == [".debug"] {
            if !self.debug {
                return Err(ControlPointError::NotFound(".debug".to_owned()));
            }
            return Ok(Resolved::File(FileNode::Debug(device)));
        }

        let mut object_id = "0".to_owned();
        for (i, component) in rest.iter().enumerate() {
            let cd = device
                .content_directory()
                .ok_or_else(|| ControlPointError::NotFound((*component).to_owned()))?;
            let children = cd
                .browse_children(&object_id)
                .await
                .ok_or_else(|| ControlPointError::BadResponse(format!("browse {object_id} failed")))?;
            let found = find_child(&children, component)
                .ok_or_else(|| ControlPointError::NotFound((*component).to_owned()))?;

            let is_last = i == rest.len() - 1;
            if is_last {
                if found.is_container {
                    let children = cd.browse_children(&found.id).await.ok_or_else(|| {
                        ControlPointError::BadResponse(format!("browse {} failed", found.id))
                    })?;
                    return Ok(Resolved::Dir(object_entries(&device, &children)));
                }
                return Ok(Resolved::File(FileNode::Object { didl: found }));
            }

            if !found.is_container {
                return Err(ControlPointError::NotADirectory((*component).to_owned()));
            }
            object_id = found.id;
        }

        unreachable!("rest is non-empty, loop always returns on its last iteration")
    }

    async fn device_root_entries(&self, device: &Arc<Device>) -> Result<Vec<Entry>, ControlPointError> {
        let mut entries = Vec::new();
        if self.debug {
            entries.push(Entry::Debug(device.clone()));
        }
        if let Some(cd) = device.content_directory() {
            let children = cd
                .browse_children("0")
                .await
                .ok_or_else(|| ControlPointError::BadResponse("browse_children(0) failed".to_owned()))?;
            entries.extend(object_entries(device, &children));
        }
        Ok(entries)
    }
}

fn find_child(children: &BrowseResult, name: &str) -> Option<DIDLObject> {
    children
        .objects
        .lock()
        .unwrap()
        .iter()
        .find(|o| o.basename == name)
        .cloned()
}

fn object_entries(device: &Arc<Device>, children: &BrowseResult) -> Vec<Entry> {
    children
        .objects
        .lock()
        .unwrap()
        .iter()
        .cloned()
        .map(|didl| Entry::Object {
            device: device.clone(),
            didl,
        })
        .collect()
}

/// The four-method errno-style boundary a real FUSE binding (out of scope
/// here) would implement directly. `InMemoryBridge` below is the only
/// implementation this crate ships, used by tests and the `demos/` CLI.
///
/// Methods are synchronous (matching FUSE's own callback shape); an
/// implementation backed by async I/O, like [`InMemoryBridge`], drives its
/// own runtime internally rather than exposing `.await` at this boundary.
pub trait FilesystemBridge {
    fn getattr(&self, path: &str) -> Result<Attributes, i32>;
    fn readdir(&self, path: &str, filler: &mut dyn FnMut(&str, EntryKind) -> bool) -> i32;
    fn open(&self, path: &str) -> Result<u64, i32>;
    fn read(&self, handle: u64, buf: &mut [u8], offset: u64) -> Result<usize, i32>;
}

/// A `FilesystemBridge` over an in-process [`Vfs`], backed by its own
/// current-thread Tokio runtime so the synchronous trait methods can drive
/// async Browse calls. Open file contents are fully materialised at `open`
/// time and kept in a handle table until the caller is done with them --
/// there is no `close`/`release` in the bridge surface, so handles live for
/// the bridge's lifetime.
pub struct InMemoryBridge {
    vfs: Vfs,
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
    handles: std::sync::Mutex<std::collections::HashMap<u64, Vec<u8>>>,
    next_handle: std::sync::atomic::AtomicU64,
}

impl InMemoryBridge {
    pub fn new(vfs: Vfs, client: reqwest::Client) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            vfs,
            client,
            runtime,
            handles: std::sync::Mutex::new(std::collections::HashMap::new()),
            next_handle: std::sync::atomic::AtomicU64::new(1),
        })
    }
}

impl FilesystemBridge for InMemoryBridge {
    fn getattr(&self, path: &str) -> Result<Attributes, i32> {
        self.runtime
            .block_on(self.vfs.stat(path))
            .map_err(|e| e.to_errno())
    }

    fn readdir(&self, path: &str, filler: &mut dyn FnMut(&str, EntryKind) -> bool) -> i32 {
        match self.runtime.block_on(self.vfs.list(path)) {
            Ok(entries) => {
                for entry in entries {
                    if filler(&entry.name, entry.kind) {
                        break;
                    }
                }
                0
            }
            Err(e) => e.to_errno(),
        }
    }

    fn open(&self, path: &str) -> Result<u64, i32> {
        let content = self
            .runtime
            .block_on(self.vfs.open(path))
            .map_err(|e| e.to_errno())?;
        let bytes = self
            .runtime
            .block_on(content.bytes(&self.client))
            .map_err(|_| ControlPointError::BadResponse("failed to materialise file".to_owned()).to_errno())?;
        let handle = self
            .next_handle
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.handles.lock().unwrap().insert(handle, bytes);
        Ok(handle)
    }

    fn read(&self, handle: u64, buf: &mut [u8], offset: u64) -> Result<usize, i32> {
        use libc::EFAULT;

        let handles = self.handles.lock().unwrap();
        let Some(bytes) = handles.get(&handle) else {
            return Err(-EFAULT);
        };
        let offset = offset as usize;
        if offset >= bytes.len() {
            return Ok(0);
        }
        let n = (bytes.len() - offset).min(buf.len());
        buf[..n].copy_from_slice(&bytes[offset..offset + n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, device_description::Udn};
    use std::time::Instant;

    fn device(udn: &str, friendly_name: &str) -> Device {
        Device {
            udn: udn.parse::<Udn>().unwrap(),
            device_type: "urn:schemas-upnp-org:device:MediaServer:1".to_owned(),
            friendly_name: friendly_name.to_owned(),
            desc_url: "http://example.invalid/desc.xml".to_owned(),
            presentation_url: None,
            created_at: Instant::now(),
            services: Vec::new(),
        }
    }

    async fn registry_with(devices: Vec<Device>) -> Arc<Registry> {
        let registry = Arc::new(Registry::new(reqwest::Client::new(), Config::default()));
        for device in devices {
            registry.insert_for_test(device);
        }
        registry
    }

    #[tokio::test]
    async fn root_lists_one_directory_per_device() {
        let registry = registry_with(vec![
            device("uuid:dev1", "Living Room"),
            device("uuid:dev2", "Bedroom"),
        ])
        .await;
        let vfs = Vfs::new(registry, false);
        let entries = vfs.list("/").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"."));
        assert!(names.contains(&".."));
        assert!(names.contains(&"Living Room"));
        assert!(names.contains(&"Bedroom"));
    }

    #[tokio::test]
    async fn unknown_device_is_not_found() {
        let registry = registry_with(vec![]).await;
        let vfs = Vfs::new(registry, false);
        let err = vfs.stat("/nope").await.unwrap_err();
        assert_eq!(err.to_errno(), -libc::ENOENT);
    }

    #[tokio::test]
    async fn debug_file_hidden_unless_enabled() {
        let registry = registry_with(vec![device("uuid:dev1", "Living Room")]).await;
        let vfs = Vfs::new(registry.clone(), false);
        assert!(vfs.stat("/Living Room/.debug").await.is_err());

        let vfs_debug = Vfs::new(registry, true);
        let attrs = vfs_debug.stat("/Living Room/.debug").await.unwrap();
        assert_eq!(attrs.mode, 0o444);
    }
}
