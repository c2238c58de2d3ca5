// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! The resource manager: priority tiers, the global shadowing index, and
//! demand-loaded filesystem copies.
//!
//! Providers register into one of seven tiers searched in a fixed order;
//! within a tier, later registrations shadow earlier ones. After
//! registration the manager builds a single `(resref, type)` index claiming
//! the most precedent provider for every name, so lookups after module load
//! never touch a provider that lost the shadowing race.
//!
//! `demand` turns a logical resource into a filesystem path: directory
//! resources hand back their native path, archive resources extract into
//! the manager's temp directory with a refcount. The temp directory is
//! named `NWN2CliExt_<pid>` and guarded by an exclusively locked
//! `instance.lock`; at construction the manager sweeps sibling directories
//! whose lock is no longer held, so crashed instances don't accumulate.
//!
//! The whole layer is single-threaded cooperative. One load, one demand at
//! a time; the interior mutability is `RefCell`, not a mutex.

use std::collections::HashMap;
use std::fs::{File, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::diag::SharedTextOut;
use crate::gff::GffReader;
use crate::tlk::{TalkStringLookup, TlkReader, STRREF_ALTERNATE_BIT, STRREF_INDEX_MASK};
use crate::twoda::TwoDaFile;

use super::directory::DirectoryProvider;
use super::erf::ErfProvider;
use super::keybif::KeyBifProvider;
use super::provider::{
    ArchiveError, FileHandle, FileId, HandleTable, Provider, ResourceAccessor,
};
use super::zipfile::ZipProvider;
use super::{checked_res_ref, ResRef16, ResRef32, ResourceError, ResType};

/// Extraction copy granularity.
const DEMAND_CHUNK: usize = 4096;

/// Temp directory name prefix; the suffix is the process id.
const TEMP_DIR_PREFIX: &str = "NWN2CliExt_";

// ============================================================================
// TIERS
// ============================================================================

/// Provider priority classes, in search order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    UserFirstChance,
    /// 32-byte-resref archives: `.mod`, `.hak`, `.erf`, `.pwc`.
    Encapsulated32,
    /// 16-byte-resref archives (older generation).
    Encapsulated16,
    Directory,
    Zip,
    KeyBif,
    UserLastChance,
}

impl Tier {
    pub const ALL: [Tier; 7] = [
        Tier::UserFirstChance,
        Tier::Encapsulated32,
        Tier::Encapsulated16,
        Tier::Directory,
        Tier::Zip,
        Tier::KeyBif,
        Tier::UserLastChance,
    ];
}

// ============================================================================
// LOAD PARAMETERS
// ============================================================================

/// Module location preference during the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleSearchOrder {
    /// Archive form first, then directory.
    #[default]
    Automatic,
    PreferDirectory,
    PreferEncapsulated,
}

/// Extended parameters to [`ResourceManager::load_module_resources`].
#[derive(Default)]
pub struct ModuleLoadParams {
    pub search_order: ModuleSearchOrder,
    /// Register only base-game resources; no module is located.
    pub base_resources_only: bool,
    /// Stop after the module itself is registered; skip HAKs, zips and key
    /// files. Enough to read the module's own manifest.
    pub core_module_only: bool,
    /// Module location failure is an error instead of a warning.
    pub require_module_ifo: bool,
    /// Use the 16-byte-resref archive generation for the module and HAKs.
    pub erf16: bool,
    /// Key files (resource names, installed at the root of the install
    /// directory) to register, earlier names more precedent.
    pub key_files: Vec<String>,
    /// Full path to the module archive or directory, overriding the search.
    pub custom_module_path: Option<PathBuf>,
    /// Campaign GUID to match against `campaign.cam` descriptors.
    pub campaign_id: Option<Vec<u8>>,
    /// Caller-supplied providers searched before everything else.
    pub custom_first_chance: Vec<Provider>,
    /// Caller-supplied providers searched after everything else.
    pub custom_last_chance: Vec<Provider>,
}

// ============================================================================
// INTERNAL RECORDS
// ============================================================================

/// One resource claimed in the global index.
#[derive(Debug, Clone, Copy)]
pub struct ResourceEntry {
    pub provider: usize,
    pub file_id: FileId,
    pub tier: Tier,
    /// 1-based position in the tier's search order (1 = most precedent).
    pub position_within_tier: usize,
}

struct IndexedResource {
    resref: ResRef32,
    res_type: ResType,
    entry: ResourceEntry,
}

struct Demanded {
    path: PathBuf,
    refcount: u32,
    delete_on_zero: bool,
}

struct RegisteredProvider {
    provider: Provider,
    tier: Tier,
}

struct ManagerOpenFile {
    provider: usize,
    inner: FileHandle,
    res_type: ResType,
}

// ============================================================================
// MANAGER
// ============================================================================

pub struct ResourceManager {
    text_out: SharedTextOut,
    providers: Vec<RegisteredProvider>,
    /// All indexed resources, manager file-id order.
    entries: Vec<IndexedResource>,
    /// `(resref, type)` to position in `entries`.
    lookup: HashMap<(ResRef32, ResType), usize>,
    demanded: HashMap<(ResRef32, ResType), Demanded>,
    demanded_by_path: HashMap<PathBuf, (ResRef32, ResType)>,
    handles: HandleTable<ManagerOpenFile>,
    temp_dir: PathBuf,
    /// Held exclusively for the manager's lifetime; the defunct sweep of
    /// future instances skips directories whose lock is still held.
    instance_lock: Option<File>,
    base_tlk: Option<TlkReader>,
    alt_tlk: Option<TlkReader>,
    /// Parse-once cache of tabular resources; `None` caches a miss.
    twoda_cache: HashMap<String, Option<TwoDaFile>>,
    module_res_name: String,
    home_dir: PathBuf,
    install_dir: PathBuf,
}

impl ResourceManager {
    /// Create a manager whose temp directory lives under the system temp
    /// root.
    pub fn new(text_out: SharedTextOut) -> Result<Self, ResourceError> {
        let root = std::env::temp_dir();
        Self::with_temp_root(text_out, &root)
    }

    /// Create a manager with an explicit temp root. Embedders and tests use
    /// this to keep instances apart.
    pub fn with_temp_root(
        text_out: SharedTextOut,
        root: &Path,
    ) -> Result<Self, ResourceError> {
        sweep_defunct_instances(root);

        let (temp_dir, instance_lock) = claim_instance_dir(root)?;
        debug!("resource manager temp directory {:?}", temp_dir);

        Ok(Self {
            text_out,
            providers: Vec::new(),
            entries: Vec::new(),
            lookup: HashMap::new(),
            demanded: HashMap::new(),
            demanded_by_path: HashMap::new(),
            handles: HandleTable::default(),
            temp_dir,
            instance_lock: Some(instance_lock),
            base_tlk: None,
            alt_tlk: None,
            twoda_cache: HashMap::new(),
            module_res_name: String::new(),
            home_dir: PathBuf::new(),
            install_dir: PathBuf::new(),
        })
    }

    fn write_text(&self, text: &str) {
        self.text_out.borrow_mut().write_text(text);
    }

    pub fn temp_directory(&self) -> &Path {
        &self.temp_dir
    }

    pub fn module_res_name(&self) -> &str {
        &self.module_res_name
    }

    // ------------------------------------------------------------------
    // Registration and index
    // ------------------------------------------------------------------

    /// Register a provider. Later registrations in the same tier shadow
    /// earlier ones once the index is rebuilt.
    pub fn register_provider(&mut self, provider: Provider, tier: Tier) {
        debug!(
            "registering {} provider into {:?} tier",
            provider.kind_name(),
            tier
        );
        self.providers.push(RegisteredProvider { provider, tier });
    }

    /// Build the global index: tiers in priority order, providers within a
    /// tier in reverse registration order, files within a provider last to
    /// first. The first claim on a `(resref, type)` key wins, which makes
    /// the most precedent provider the owner.
    pub fn discover_resources(&mut self) {
        self.entries.clear();
        self.lookup.clear();

        for tier in Tier::ALL {
            let mut position = 0;
            for pidx in (0..self.providers.len()).rev() {
                if self.providers[pidx].tier != tier {
                    continue;
                }
                position += 1;
                let count = self.providers[pidx].provider.encapsulated_count();
                for id in (0..count).rev() {
                    let Some((resref, res_type)) =
                        self.providers[pidx].provider.encapsulated_entry(id)
                    else {
                        continue; // unrecognized type, invisible
                    };
                    if let std::collections::hash_map::Entry::Vacant(slot) =
                        self.lookup.entry((resref, res_type))
                    {
                        slot.insert(self.entries.len());
                        self.entries.push(IndexedResource {
                            resref,
                            res_type,
                            entry: ResourceEntry {
                                provider: pidx,
                                file_id: id,
                                tier,
                                position_within_tier: position,
                            },
                        });
                    }
                }
            }
        }
        debug!("indexed {} resources", self.entries.len());
    }

    /// Number of indexed resources.
    pub fn indexed_count(&self) -> usize {
        self.entries.len()
    }

    /// Index-only existence check; no provider I/O.
    pub fn resource_exists(&self, name: &str, res_type: ResType) -> bool {
        match checked_res_ref(name) {
            Ok(resref) => self.lookup.contains_key(&(resref, res_type)),
            Err(_) => false,
        }
    }

    // ------------------------------------------------------------------
    // Demand / release
    // ------------------------------------------------------------------

    /// Resolve a resource to a filesystem path, extracting a temp copy for
    /// archive-backed resources. Balance with [`release`](Self::release).
    pub fn demand(&mut self, name: &str, res_type: ResType) -> Result<PathBuf, ResourceError> {
        let resref = checked_res_ref(name)?;

        if let Some(demanded) = self.demanded.get_mut(&(resref, res_type)) {
            demanded.refcount += 1;
            return Ok(demanded.path.clone());
        }

        let entry = self
            .lookup
            .get(&(resref, res_type))
            .map(|&pos| self.entries[pos].entry)
            .ok_or(ResourceError::NotFound { resref, res_type })?;

        let (path, delete_on_zero) = if entry.tier == Tier::Directory {
            // Directory resources already live on disk; reuse the original.
            let path = self.providers[entry.provider]
                .provider
                .native_path(entry.file_id)
                .ok_or(ResourceError::OpenFailed { resref, res_type })?;
            (path, false)
        } else {
            (self.extract_to_temp(resref, res_type, entry)?, true)
        };

        self.demanded.insert(
            (resref, res_type),
            Demanded {
                path: path.clone(),
                refcount: 1,
                delete_on_zero,
            },
        );
        self.demanded_by_path.insert(path.clone(), (resref, res_type));
        Ok(path)
    }

    /// Copy an archive-backed resource into the temp directory in
    /// `DEMAND_CHUNK` pieces. Every failure path closes the provider handle
    /// and removes the partial file.
    fn extract_to_temp(
        &mut self,
        resref: ResRef32,
        res_type: ResType,
        entry: ResourceEntry,
    ) -> Result<PathBuf, ResourceError> {
        let ext = res_type
            .extension()
            .ok_or(ResourceError::UnmappedType { res_type })?;
        let path = self.temp_dir.join(format!("{}.{}", resref, ext));

        let provider = &mut self.providers[entry.provider].provider;
        let handle = provider
            .open_file_by_index(entry.file_id)
            .ok_or(ResourceError::OpenFailed { resref, res_type })?;

        let size = provider.encapsulated_size(handle).unwrap_or(0);

        let mut file = match File::create(&path) {
            Ok(file) => file,
            Err(err) => {
                provider.close_file(handle);
                return Err(err.into());
            }
        };
        // Pre-allocate so a full disk fails here, not mid-copy.
        if let Err(err) = file.set_len(size) {
            provider.close_file(handle);
            drop(file);
            let _ = std::fs::remove_file(&path);
            return Err(err.into());
        }

        let mut offset: u64 = 0;
        let mut chunk = [0u8; DEMAND_CHUNK];
        loop {
            match provider.read_encapsulated(handle, offset, &mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(err) = file.write_all(&chunk[..n]) {
                        provider.close_file(handle);
                        drop(file);
                        let _ = std::fs::remove_file(&path);
                        return Err(err.into());
                    }
                    offset += n as u64;
                }
                Err(err) => {
                    provider.close_file(handle);
                    drop(file);
                    let _ = std::fs::remove_file(&path);
                    return Err(ResourceError::Provider(err));
                }
            }
        }
        provider.close_file(handle);
        Ok(path)
    }

    /// Drop one reference to a demanded path; at zero the temp copy is
    /// deleted (directory-backed originals are left alone).
    pub fn release(&mut self, path: &Path) -> Result<(), ResourceError> {
        let key = self
            .demanded_by_path
            .get(path)
            .copied()
            .ok_or_else(|| ResourceError::NotDemanded {
                path: path.to_path_buf(),
            })?;
        let demanded = self
            .demanded
            .get_mut(&key)
            .expect("demand tables are kept in step");
        demanded.refcount -= 1;
        if demanded.refcount == 0 {
            if demanded.delete_on_zero {
                let _ = std::fs::remove_file(&demanded.path);
            }
            self.demanded.remove(&key);
            self.demanded_by_path.remove(path);
        }
        Ok(())
    }

    /// Read an entire resource into memory through the provider interface;
    /// no temp file is created.
    pub fn load_resource(&mut self, name: &str, res_type: ResType) -> Result<Vec<u8>, ResourceError> {
        let resref = checked_res_ref(name)?;
        let handle = self
            .open_file(&resref, res_type)
            .ok_or(ResourceError::NotFound { resref, res_type })?;
        let size = self.encapsulated_size(handle).unwrap_or(0) as usize;
        let mut data = vec![0u8; size];
        let mut offset = 0usize;
        while offset < size {
            match self.read_encapsulated(handle, offset as u64, &mut data[offset..]) {
                Ok(0) => break,
                Ok(n) => offset += n,
                Err(err) => {
                    self.close_file(handle);
                    return Err(ResourceError::Provider(err));
                }
            }
        }
        self.close_file(handle);
        data.truncate(offset);
        Ok(data)
    }

    // ------------------------------------------------------------------
    // Module load
    // ------------------------------------------------------------------

    /// Full module load: tear down, register every provider tier in order,
    /// rebuild the index, and load talk tables.
    pub fn load_module_resources(
        &mut self,
        module_name: &str,
        alt_tlk: Option<&str>,
        home_dir: &Path,
        install_dir: &Path,
        haks: &[String],
        mut params: ModuleLoadParams,
    ) -> Result<(), ResourceError> {
        self.unload_all_resources();

        self.module_res_name = module_name.to_string();
        self.home_dir = home_dir.to_path_buf();
        self.install_dir = install_dir.to_path_buf();

        for provider in std::mem::take(&mut params.custom_first_chance) {
            self.register_provider(provider, Tier::UserFirstChance);
        }

        if !params.base_resources_only {
            if let Err(err) = self.locate_and_register_module(&params) {
                if params.require_module_ifo {
                    return Err(err);
                }
                self.write_text(&format!(
                    "WARNING: {}. Module resources will be unavailable.\n",
                    err
                ));
            } else {
                if let Some(campaign_id) = &params.campaign_id {
                    self.register_matching_campaign(campaign_id);
                }
                if !params.core_module_only {
                    self.register_haks(haks, params.erf16);
                }
            }
        }

        self.register_directories();

        if !params.core_module_only {
            self.register_zip_archives();
            self.register_key_files(&params.key_files);
        }

        for provider in params.custom_last_chance {
            self.register_provider(provider, Tier::UserLastChance);
        }

        self.discover_resources();
        self.load_talk_tables(alt_tlk);
        Ok(())
    }

    /// Core-only load: enough to read the module's own manifest (HAK list,
    /// custom talk file) before committing to a full load.
    pub fn load_module_resources_lite(
        &mut self,
        module_name: &str,
        home_dir: &Path,
        install_dir: &Path,
        mut params: ModuleLoadParams,
    ) -> Result<(), ResourceError> {
        params.core_module_only = true;
        self.load_module_resources(module_name, None, home_dir, install_dir, &[], params)
    }

    /// Tear down all providers, the index, demanded copies, and caches.
    pub fn unload_all_resources(&mut self) {
        let forced = self.close_open_resource_file_handles();
        if forced != 0 {
            self.write_text(&format!(
                "WARNING: {} resource file handle(s) were still open at unload.\n",
                forced
            ));
        }
        self.clean_demand_loaded_files();
        self.providers.clear();
        self.entries.clear();
        self.lookup.clear();
        self.base_tlk = None;
        self.alt_tlk = None;
        self.twoda_cache.clear();
    }

    /// Forcibly close outstanding handles; answers how many there were.
    pub fn close_open_resource_file_handles(&mut self) -> usize {
        let open = self.handles.drain();
        let count = open.len();
        for (handle, state) in open {
            warn!("forcibly closing leaked resource handle {}", handle);
            self.providers[state.provider].provider.close_file(state.inner);
        }
        count
    }

    fn clean_demand_loaded_files(&mut self) {
        for demanded in self.demanded.values() {
            if demanded.delete_on_zero {
                let _ = std::fs::remove_file(&demanded.path);
            }
        }
        self.demanded.clear();
        self.demanded_by_path.clear();
    }

    fn locate_and_register_module(
        &mut self,
        params: &ModuleLoadParams,
    ) -> Result<(), ResourceError> {
        let name = self.module_res_name.clone();

        if let Some(custom) = &params.custom_module_path {
            return self.register_module_at(custom.clone(), params.erf16);
        }
        if name.is_empty() {
            return Err(ResourceError::ModuleNotFound { name });
        }
        checked_res_ref(&name)?;

        let prefer_dir = params.search_order == ModuleSearchOrder::PreferDirectory;
        let prefer_erf = params.search_order == ModuleSearchOrder::PreferEncapsulated;

        // Home before install; in each root, archive then compressed world
        // content then directory form.
        for root in [self.home_dir.clone(), self.install_dir.clone()] {
            let mod_path = root.join("modules").join(format!("{}.mod", name));
            if !prefer_dir && erf_has_module_ifo(&mod_path, params.erf16) {
                debug!("found module archive {:?}", mod_path);
                return self.register_module_at(mod_path, params.erf16);
            }

            let pwc_path = root.join("pwc").join(format!("{}.pwc", name));
            if !prefer_dir && erf_has_module_ifo(&pwc_path, params.erf16) {
                debug!("found compressed world content {:?}", pwc_path);
                return self.register_module_at(pwc_path, params.erf16);
            }

            let dir_path = root.join("modules").join(&name);
            if !prefer_erf && dir_path.join("module.ifo").is_file() {
                debug!("found module directory {:?}", dir_path);
                return self.register_module_at(dir_path, params.erf16);
            }
        }

        // Directory/archive preference exhausted; retry without it before
        // falling back to the legacy campaign-module location.
        if prefer_dir || prefer_erf {
            for root in [self.home_dir.clone(), self.install_dir.clone()] {
                let mod_path = root.join("modules").join(format!("{}.mod", name));
                if erf_has_module_ifo(&mod_path, params.erf16) {
                    return self.register_module_at(mod_path, params.erf16);
                }
                let dir_path = root.join("modules").join(&name);
                if dir_path.join("module.ifo").is_file() {
                    return self.register_module_at(dir_path, params.erf16);
                }
            }
        }

        let nwm_path = self
            .install_dir
            .join("NWM")
            .join(format!("{}.nwm", name));
        if erf_has_module_ifo(&nwm_path, params.erf16) {
            debug!("found legacy campaign module {:?}", nwm_path);
            return self.register_module_at(nwm_path, params.erf16);
        }

        Err(ResourceError::ModuleNotFound { name })
    }

    fn register_module_at(&mut self, path: PathBuf, erf16: bool) -> Result<(), ResourceError> {
        if path.is_dir() {
            if !path.join("module.ifo").is_file() {
                return Err(ResourceError::ModuleNotFound {
                    name: path.display().to_string(),
                });
            }
            let provider = DirectoryProvider::new(&path)?;
            self.register_provider(Provider::Directory(provider), Tier::Directory);
        } else if erf16 {
            let provider = ErfProvider::<ResRef16>::open(&path)?;
            self.register_provider(Provider::Erf16(provider), Tier::Encapsulated16);
        } else {
            let provider = ErfProvider::<ResRef32>::open(&path)?;
            self.register_provider(Provider::Erf32(provider), Tier::Encapsulated32);
        }
        Ok(())
    }

    /// Sweep `Campaigns/*/campaign.cam` under home then install for a
    /// descriptor whose GUID matches, and register its directory.
    fn register_matching_campaign(&mut self, campaign_id: &[u8]) {
        for root in [self.home_dir.clone(), self.install_dir.clone()] {
            let campaigns = root.join("Campaigns");
            let Ok(dirs) = std::fs::read_dir(&campaigns) else {
                continue;
            };
            for dir in dirs.flatten() {
                let dir_path = dir.path();
                if !dir_path.is_dir() {
                    continue;
                }
                let cam_path = dir_path.join("campaign.cam");
                if !cam_path.is_file() {
                    continue;
                }
                let matches = GffReader::from_file(&cam_path)
                    .ok()
                    .and_then(|cam| cam.root().get_blob("GUID"))
                    .is_some_and(|guid| guid == campaign_id);
                if matches {
                    debug!("campaign match at {:?}", dir_path);
                    match DirectoryProvider::new(&dir_path) {
                        Ok(provider) => {
                            self.register_provider(
                                Provider::Directory(provider),
                                Tier::Directory,
                            );
                        }
                        Err(err) => self.write_text(&format!(
                            "WARNING: Failed to index campaign directory '{}': {}.\n",
                            dir_path.display(),
                            err
                        )),
                    }
                    return;
                }
            }
        }
    }

    /// Register module HAK archives, home before install per HAK. The list
    /// is walked in reverse so that earlier HAKs end up more precedent.
    fn register_haks(&mut self, haks: &[String], erf16: bool) {
        for hak in haks.iter().rev() {
            if checked_res_ref(hak).is_err() {
                self.write_text(&format!("WARNING: Ignoring illegal HAK name '{}'.\n", hak));
                continue;
            }
            let mut registered = false;
            for root in [self.home_dir.clone(), self.install_dir.clone()] {
                let path = root.join("hak").join(format!("{}.hak", hak));
                if !path.is_file() {
                    continue;
                }
                let result = if erf16 {
                    ErfProvider::<ResRef16>::open(&path).map(Provider::Erf16)
                } else {
                    ErfProvider::<ResRef32>::open(&path).map(Provider::Erf32)
                };
                match result {
                    Ok(provider) => {
                        let tier = if erf16 {
                            Tier::Encapsulated16
                        } else {
                            Tier::Encapsulated32
                        };
                        self.register_provider(provider, tier);
                        registered = true;
                    }
                    Err(err) => self.write_text(&format!(
                        "WARNING: Failed to load HAK file '{}': {}. Certain module resources may be unavailable.\n",
                        path.display(),
                        err
                    )),
                }
                break;
            }
            if !registered {
                debug!("hak '{}' not found in home or install", hak);
            }
        }
    }

    /// Built-in directory providers: `pwc` and `override` from home and
    /// install.
    fn register_directories(&mut self) {
        for dir in ["pwc", "override"] {
            for root in [self.home_dir.clone(), self.install_dir.clone()] {
                match DirectoryProvider::new(root.join(dir)) {
                    Ok(provider) => {
                        self.register_provider(Provider::Directory(provider), Tier::Directory);
                    }
                    Err(err) => self.write_text(&format!(
                        "WARNING: Failed to index directory '{}/{}': {}.\n",
                        root.display(),
                        dir,
                        err
                    )),
                }
            }
        }
    }

    /// Every `*.zip` in the `Data` subdirectory of home and install, in
    /// the directory's native enumeration order so patch archives keep
    /// their shipped precedence.
    fn register_zip_archives(&mut self) {
        for root in [self.home_dir.clone(), self.install_dir.clone()] {
            let data_dir = root.join("Data");
            let Ok(entries) = std::fs::read_dir(&data_dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let is_zip = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
                if !is_zip {
                    continue;
                }
                match ZipProvider::open(&path) {
                    Ok(provider) => {
                        self.register_provider(Provider::Zip(provider), Tier::Zip);
                    }
                    Err(err) => self.write_text(&format!(
                        "WARNING: Failed to open zip archive '{}': {}.\n",
                        path.display(),
                        err
                    )),
                }
            }
        }
    }

    /// Fixed key files from the install root, reversed so earlier names
    /// are more precedent.
    fn register_key_files(&mut self, key_files: &[String]) {
        for name in key_files.iter().rev() {
            let path = self.install_dir.join(format!("{}.key", name));
            match KeyBifProvider::open(&path, &self.install_dir) {
                Ok(provider) => {
                    self.register_provider(Provider::KeyBif(provider), Tier::KeyBif);
                }
                Err(err) => {
                    debug!("failed to open key archive {:?}: {}", path, err);
                }
            }
        }
    }

    /// Load the base talk table and, when configured, the alternate one.
    fn load_talk_tables(&mut self, alt_tlk: Option<&str>) {
        self.base_tlk = None;
        self.alt_tlk = None;

        for root in [self.home_dir.clone(), self.install_dir.clone()] {
            let path = root.join("dialog.tlk");
            if path.is_file() {
                match TlkReader::from_file(&path) {
                    Ok(tlk) => {
                        self.base_tlk = Some(tlk);
                        break;
                    }
                    Err(err) => self.write_text(&format!(
                        "WARNING: Failed to load talk table '{}': {}.\n",
                        path.display(),
                        err
                    )),
                }
            }
        }

        let Some(alt) = alt_tlk.filter(|name| !name.is_empty()) else {
            return;
        };
        let candidates: Vec<PathBuf> = [&self.home_dir, &self.install_dir]
            .iter()
            .flat_map(|root| {
                [
                    root.join("tlk").join(format!("{}.tlk", alt)),
                    root.join(format!("{}.tlk", alt)),
                ]
            })
            .collect();
        for path in candidates {
            if !path.is_file() {
                continue;
            }
            match TlkReader::from_file(&path) {
                Ok(tlk) => {
                    self.alt_tlk = Some(tlk);
                    return;
                }
                Err(err) => self.write_text(&format!(
                    "WARNING: Failed to load alternate talk table '{}': {}.\n",
                    path.display(),
                    err
                )),
            }
        }
        self.write_text(&format!(
            "WARNING: Alternate talk table '{}' could not be located.\n",
            alt
        ));
    }

    // ------------------------------------------------------------------
    // Talk strings and tabular lookups
    // ------------------------------------------------------------------

    /// 2DA lookup through the parse-once cache. Resource names must be
    /// canonical (lower case).
    pub fn lookup_2da(&mut self, resource_name: &str, column: &str, row: usize) -> Option<String> {
        if !self.twoda_cache.contains_key(resource_name) {
            let parsed = self
                .load_resource(resource_name, ResType::TWO_DA)
                .ok()
                .and_then(|bytes| TwoDaFile::from_bytes(&bytes).ok());
            self.twoda_cache
                .insert(resource_name.to_string(), parsed);
        }
        self.twoda_cache
            .get(resource_name)?
            .as_ref()?
            .value(row, column)
            .map(str::to_string)
    }

    pub fn lookup_2da_i32(&mut self, resource_name: &str, column: &str, row: usize) -> Option<i32> {
        self.lookup_2da(resource_name, column, row)?.parse().ok()
    }
}

impl TalkStringLookup for ResourceManager {
    /// STRREF resolution: bit 31 selects the alternate table; the low bits
    /// index whichever table is selected.
    fn talk_string(&self, strref: u32) -> Option<String> {
        if strref == crate::gff::STRREF_INVALID {
            return None;
        }
        let table = if strref & STRREF_ALTERNATE_BIT != 0 {
            self.alt_tlk.as_ref()?
        } else {
            self.base_tlk.as_ref()?
        };
        table.string(strref & STRREF_INDEX_MASK)
    }
}

// ============================================================================
// ACCESSOR INTERFACE
// ============================================================================

impl ResourceAccessor for ResourceManager {
    fn open_file(&mut self, resref: &ResRef32, res_type: ResType) -> Option<FileHandle> {
        let &pos = self.lookup.get(&(*resref, res_type))?;
        self.open_file_by_index(pos as FileId)
    }

    fn open_file_by_index(&mut self, id: FileId) -> Option<FileHandle> {
        let indexed = self.entries.get(id as usize)?;
        let provider_index = indexed.entry.provider;
        let res_type = indexed.res_type;
        let file_id = indexed.entry.file_id;
        let inner = self.providers[provider_index]
            .provider
            .open_file_by_index(file_id)?;
        match self.handles.insert(ManagerOpenFile {
            provider: provider_index,
            inner,
            res_type,
        }) {
            Some(handle) => Some(handle),
            None => {
                // Handle space exhausted; don't leak the inner handle.
                self.providers[provider_index].provider.close_file(inner);
                None
            }
        }
    }

    fn close_file(&mut self, handle: FileHandle) -> bool {
        match self.handles.remove(handle) {
            Some(state) => self.providers[state.provider].provider.close_file(state.inner),
            None => false,
        }
    }

    fn read_encapsulated(
        &mut self,
        handle: FileHandle,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, ArchiveError> {
        let state = self
            .handles
            .get(handle)
            .ok_or(ArchiveError::BadHandle { handle })?;
        let (provider, inner) = (state.provider, state.inner);
        self.providers[provider]
            .provider
            .read_encapsulated(inner, offset, buf)
    }

    fn encapsulated_size(&self, handle: FileHandle) -> Option<u64> {
        let state = self.handles.get(handle)?;
        self.providers[state.provider]
            .provider
            .encapsulated_size(state.inner)
    }

    fn encapsulated_type(&self, handle: FileHandle) -> Option<ResType> {
        let state = self.handles.get(handle)?;
        Some(state.res_type)
    }

    fn encapsulated_entry(&self, id: FileId) -> Option<(ResRef32, ResType)> {
        let indexed = self.entries.get(id as usize)?;
        Some((indexed.resref, indexed.res_type))
    }

    fn encapsulated_count(&self) -> u64 {
        self.entries.len() as u64
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        let leaked = self.close_open_resource_file_handles();
        if leaked != 0 {
            warn!("{} resource handle(s) leaked at manager teardown", leaked);
        }
        self.clean_demand_loaded_files();
        // Release the instance lock before removing the directory that
        // holds the lock file.
        self.instance_lock = None;
        let _ = std::fs::remove_dir_all(&self.temp_dir);
    }
}

// ============================================================================
// INSTANCE DIRECTORY LIFECYCLE
// ============================================================================

/// Create `NWN2CliExt_<pid>` under `root` and take its instance lock. If
/// another live manager in this process already holds the canonical name, a
/// numbered variant is claimed instead.
fn claim_instance_dir(root: &Path) -> Result<(PathBuf, File), ResourceError> {
    let base = format!("{}{}", TEMP_DIR_PREFIX, std::process::id());
    for attempt in 0..64u32 {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{}_{}", base, attempt)
        };
        let dir = root.join(&name);
        std::fs::create_dir_all(&dir)?;
        let lock_path = dir.join("instance.lock");
        let lock = File::create(&lock_path)?;
        match lock.try_lock() {
            Ok(()) => return Ok((dir, lock)),
            Err(TryLockError::WouldBlock) => continue,
            Err(TryLockError::Error(err)) => return Err(err.into()),
        }
    }
    Err(ResourceError::Io(std::io::Error::other(
        "unable to claim an instance temp directory",
    )))
}

/// Whether `path` is an ERF archive of the right generation carrying a
/// `module.ifo` manifest.
fn erf_has_module_ifo(path: &Path, erf16: bool) -> bool {
    if !path.is_file() {
        return false;
    }
    let module = ResRef32::new("module");
    if erf16 {
        match ErfProvider::<ResRef16>::open(path) {
            Ok(mut erf) => match erf.open_file(&module, ResType::IFO) {
                Some(handle) => {
                    erf.close_file(handle);
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    } else {
        match ErfProvider::<ResRef32>::open(path) {
            Ok(mut erf) => match erf.open_file(&module, ResType::IFO) {
                Some(handle) => {
                    erf.close_file(handle);
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }
}

/// Remove sibling instance directories whose lock is no longer held. A
/// directory with a held lock belongs to a live instance and is skipped.
fn sweep_defunct_instances(root: &Path) {
    let Ok(entries) = std::fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(TEMP_DIR_PREFIX) || !path.is_dir() {
            continue;
        }
        let lock_path = path.join("instance.lock");
        let defunct = match File::open(&lock_path) {
            Ok(lock) => match lock.try_lock() {
                Ok(()) => true, // lock acquirable, holder is gone
                Err(TryLockError::WouldBlock) => false,
                Err(TryLockError::Error(_)) => false,
            },
            // No lock file at all: a crashed instance from before the lock
            // was taken, or an interrupted teardown.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(_) => false,
        };
        if defunct {
            debug!("sweeping defunct instance directory {:?}", path);
            let _ = std::fs::remove_dir_all(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::erf::build_erf;
    use super::super::zipfile::build_zip;
    use super::*;
    use crate::diag::BufferTextOut;

    fn test_manager(root: &Path) -> ResourceManager {
        ResourceManager::with_temp_root(BufferTextOut::new().into_shared(), root).unwrap()
    }

    fn dir_provider(root: &Path, files: &[(&str, &[u8])]) -> Provider {
        for (name, body) in files {
            std::fs::write(root.join(name), body).unwrap();
        }
        Provider::Directory(DirectoryProvider::new(root).unwrap())
    }

    #[test]
    fn later_registration_shadows_earlier_in_same_tier() {
        let scratch = tempfile::tempdir().unwrap();
        let p1 = scratch.path().join("p1");
        let p2 = scratch.path().join("p2");
        std::fs::create_dir_all(&p1).unwrap();
        std::fs::create_dir_all(&p2).unwrap();

        let mut manager = test_manager(scratch.path());
        manager.register_provider(dir_provider(&p1, &[("foo.nss", b"v1")]), Tier::Directory);
        manager.register_provider(dir_provider(&p2, &[("foo.nss", b"v2")]), Tier::Directory);
        manager.discover_resources();

        let path = manager.demand("foo", ResType::NSS).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"v2");
        manager.release(&path).unwrap();
    }

    #[test]
    fn earlier_tier_wins_over_later_tier() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = scratch.path().join("dir");
        std::fs::create_dir_all(&dir).unwrap();

        let erf_path = scratch.path().join("mod.mod");
        std::fs::write(
            &erf_path,
            build_erf(b"MOD ", true, &[("foo", ResType::NSS, b"from-erf")]),
        )
        .unwrap();

        let mut manager = test_manager(scratch.path());
        manager.register_provider(dir_provider(&dir, &[("foo.nss", b"from-dir")]), Tier::Directory);
        manager.register_provider(
            Provider::Erf32(ErfProvider::open(&erf_path).unwrap()),
            Tier::Encapsulated32,
        );
        manager.discover_resources();

        // Encapsulated32 precedes Directory in the search order.
        let bytes = manager.load_resource("foo", ResType::NSS).unwrap();
        assert_eq!(bytes, b"from-erf");
    }

    #[test]
    fn demand_refcounts_and_deletes_temp_copy() {
        let scratch = tempfile::tempdir().unwrap();
        let erf_path = scratch.path().join("data.erf");
        std::fs::write(
            &erf_path,
            build_erf(b"ERF ", true, &[("script", ResType::NSS, b"void main() {}")]),
        )
        .unwrap();

        let mut manager = test_manager(scratch.path());
        manager.register_provider(
            Provider::Erf32(ErfProvider::open(&erf_path).unwrap()),
            Tier::Encapsulated32,
        );
        manager.discover_resources();

        let n = 3;
        let mut paths = Vec::new();
        for _ in 0..n {
            paths.push(manager.demand("script", ResType::NSS).unwrap());
        }
        assert!(paths.windows(2).all(|w| w[0] == w[1]));
        assert!(paths[0].exists());
        assert!(paths[0].starts_with(manager.temp_directory()));
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"void main() {}");

        for (i, path) in paths.iter().enumerate() {
            assert!(path.exists(), "copy must live until the final release");
            manager.release(path).unwrap();
            if i + 1 < n {
                assert!(path.exists());
            }
        }
        assert!(!paths[0].exists(), "final release removes the temp copy");

        assert!(matches!(
            manager.release(&paths[0]),
            Err(ResourceError::NotDemanded { .. })
        ));
    }

    #[test]
    fn directory_resources_reuse_native_path() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = scratch.path().join("override");
        std::fs::create_dir_all(&dir).unwrap();

        let mut manager = test_manager(scratch.path());
        manager.register_provider(dir_provider(&dir, &[("raw.2da", b"2DA V2.0\n\nX\n0 1\n")]), Tier::Directory);
        manager.discover_resources();

        let path = manager.demand("raw", ResType::TWO_DA).unwrap();
        assert_eq!(path, dir.join("raw.2da"));
        manager.release(&path).unwrap();
        // Releasing a directory-backed resource must not delete the original.
        assert!(path.exists());
    }

    #[test]
    fn illegal_names_are_rejected_before_lookup() {
        let scratch = tempfile::tempdir().unwrap();
        let mut manager = test_manager(scratch.path());
        assert!(matches!(
            manager.demand("../evil", ResType::NSS),
            Err(ResourceError::IllegalName { .. })
        ));
        assert!(!manager.resource_exists("con", ResType::NSS));
    }

    #[test]
    fn handle_interface_forwards_to_winning_provider() {
        let scratch = tempfile::tempdir().unwrap();
        let zip_path = scratch.path().join("patch.zip");
        std::fs::write(
            &zip_path,
            build_zip(&[("x2_inc.nss", b"// include\n", true)]),
        )
        .unwrap();

        let mut manager = test_manager(scratch.path());
        manager.register_provider(
            Provider::Zip(ZipProvider::open(&zip_path).unwrap()),
            Tier::Zip,
        );
        manager.discover_resources();

        let handle = manager
            .open_file(&ResRef32::new("x2_inc"), ResType::NSS)
            .unwrap();
        assert_ne!(handle, super::super::INVALID_FILE);
        assert_eq!(manager.encapsulated_type(handle), Some(ResType::NSS));
        assert_eq!(manager.encapsulated_size(handle), Some(11));
        let mut buf = [0u8; 11];
        assert_eq!(manager.read_encapsulated(handle, 0, &mut buf).unwrap(), 11);
        assert_eq!(&buf, b"// include\n");
        assert!(manager.close_file(handle));
        assert!(!manager.close_file(handle));
    }

    #[test]
    fn module_load_from_custom_directory() {
        let scratch = tempfile::tempdir().unwrap();
        let module_dir = scratch.path().join("mymod");
        std::fs::create_dir_all(&module_dir).unwrap();
        std::fs::write(module_dir.join("module.ifo"), b"placeholder").unwrap();
        std::fs::write(module_dir.join("main.nss"), b"void main() {}").unwrap();

        let home = scratch.path().join("home");
        let install = scratch.path().join("install");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::create_dir_all(&install).unwrap();

        let mut manager = test_manager(scratch.path());
        manager
            .load_module_resources(
                "mymod",
                None,
                &home,
                &install,
                &[],
                ModuleLoadParams {
                    custom_module_path: Some(module_dir),
                    require_module_ifo: true,
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(manager.resource_exists("main", ResType::NSS));
        assert!(!manager.resource_exists("absent", ResType::NSS));
    }

    #[test]
    fn module_search_is_a_warning_without_require_flag() {
        let scratch = tempfile::tempdir().unwrap();
        let home = scratch.path().join("home");
        let install = scratch.path().join("install");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::create_dir_all(&install).unwrap();

        let sink = std::rc::Rc::new(std::cell::RefCell::new(BufferTextOut::new()));
        let mut manager =
            ResourceManager::with_temp_root(sink.clone(), scratch.path()).unwrap();
        manager
            .load_module_resources(
                "no_such_module",
                None,
                &home,
                &install,
                &[],
                ModuleLoadParams::default(),
            )
            .unwrap();
        assert!(sink.borrow().contents().contains("WARNING:"));
    }

    #[test]
    fn defunct_instance_directories_are_swept() {
        let scratch = tempfile::tempdir().unwrap();
        // Fake a crashed instance: directory with no held lock.
        let stale = scratch.path().join("NWN2CliExt_999999");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("orphan.nss"), b"x").unwrap();

        let manager = test_manager(scratch.path());
        assert!(!stale.exists(), "stale instance dir should be swept");
        assert!(manager.temp_directory().exists());
    }

    #[test]
    fn live_instance_directories_survive_the_sweep() {
        let scratch = tempfile::tempdir().unwrap();
        let first = test_manager(scratch.path());
        let first_dir = first.temp_directory().to_path_buf();
        // A second manager in the same process sweeps, then claims its own
        // numbered directory. The first one's must survive.
        let second = test_manager(scratch.path());
        assert!(first_dir.exists());
        assert_ne!(first.temp_directory(), second.temp_directory());
    }

    #[test]
    fn temp_directory_removed_on_drop() {
        let scratch = tempfile::tempdir().unwrap();
        let temp_dir;
        {
            let mut manager = test_manager(scratch.path());
            temp_dir = manager.temp_directory().to_path_buf();

            let erf_path = scratch.path().join("a.erf");
            std::fs::write(
                &erf_path,
                build_erf(b"ERF ", true, &[("keep", ResType::NSS, b"text")]),
            )
            .unwrap();
            manager.register_provider(
                Provider::Erf32(ErfProvider::open(&erf_path).unwrap()),
                Tier::Encapsulated32,
            );
            manager.discover_resources();
            // Leave a demanded copy outstanding; teardown must remove it.
            let _ = manager.demand("keep", ResType::NSS).unwrap();
            assert!(temp_dir.exists());
        }
        assert!(!temp_dir.exists());
    }

    #[test]
    fn twoda_lookups_parse_once_and_cache() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = scratch.path().join("data");
        std::fs::create_dir_all(&dir).unwrap();

        let mut manager = test_manager(scratch.path());
        manager.register_provider(
            dir_provider(&dir, &[("skills.2da", b"2DA V2.0\n\n    Label\n0   listen\n1   spot\n")]),
            Tier::Directory,
        );
        manager.discover_resources();

        assert_eq!(
            manager.lookup_2da("skills", "Label", 1).as_deref(),
            Some("spot")
        );
        assert_eq!(manager.lookup_2da("skills", "Label", 9), None);
        assert_eq!(manager.lookup_2da("missing", "Label", 0), None);
    }
}
