//! Libraries, their name dictionaries and import/export namespaces.
use ahash::AHashMap;

use crate::{
    ClassFlags, ClassId, Isolate, LanguageError, LanguageErrorKind, ObjectError, ObjectId,
    ObjectResult, Script, Space, StringHasher, StringObject, TOP_LEVEL_NAME, TokenPosition,
    Visitable, Visitor, field_name_from_getter, field_name_from_setter,
};

const MAX_IMPORTS: usize = u16::MAX as usize;

/// Open addressed name to entity table, doubled once 3/4 full.
#[derive(Debug, Clone)]
pub struct Dictionary {
    slots: Vec<Option<(ObjectId, ObjectId)>>,
    used: usize,
}

impl Dictionary {
    const INITIAL_CAPACITY: usize = 8;

    pub fn new() -> Self {
        Self {
            slots: vec![None; Self::INITIAL_CAPACITY],
            used: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn probe(&self, name: ObjectId, hash: u32) -> usize {
        let mask = self.slots.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            match self.slots[index] {
                Some((key, _)) if key != name => index = (index + 1) & mask,
                _ => return index,
            }
        }
    }

    pub fn get(&self, name: ObjectId, hash: u32) -> Option<ObjectId> {
        self.slots[self.probe(name, hash)].map(|(_, entity)| entity)
    }

    /// Inserts or replaces. `hash_of` rehashes existing keys when growing.
    pub fn insert(
        &mut self,
        name: ObjectId,
        hash: u32,
        entity: ObjectId,
        hash_of: impl Fn(ObjectId) -> u32,
    ) {
        let index = self.probe(name, hash);
        if self.slots[index].is_some() {
            self.slots[index] = Some((name, entity));
            return;
        }
        self.slots[index] = Some((name, entity));
        self.used += 1;
        if self.used * 4 > self.slots.len() * 3 {
            self.grow(hash_of);
        }
    }

    fn grow(&mut self, hash_of: impl Fn(ObjectId) -> u32) {
        let new_len = self.slots.len() * 2;
        let old = std::mem::replace(&mut self.slots, vec![None; new_len]);
        for (name, entity) in old.into_iter().flatten() {
            let index = self.probe(name, hash_of(name));
            self.slots[index] = Some((name, entity));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, ObjectId)> + '_ {
        self.slots.iter().flatten().copied()
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

/// An import or export with optional `show`/`hide` filters.
pub struct Namespace {
    pub target: ObjectId,
    show: Option<Vec<String>>,
    hide: Vec<String>,
}

impl Namespace {
    pub fn new(target: ObjectId, show: Option<Vec<String>>, hide: Vec<String>) -> Self {
        Self { target, show, hide }
    }

    /// Filters apply to the accessed name, `get:x` and `set:x` follow `x`.
    pub fn hides(&self, name: &str) -> bool {
        let plain = field_name_from_getter(name)
            .or_else(|| field_name_from_setter(name))
            .unwrap_or(name);
        if self.hide.iter().any(|hidden| hidden == plain) {
            return true;
        }
        match &self.show {
            Some(shown) => !shown.iter().any(|shown| shown == plain),
            None => false,
        }
    }
}

impl Visitable for Namespace {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_id(self.target);
    }
}

pub struct Library {
    pub url: ObjectId,
    pub index: usize,
    private_key: String,
    dictionary: Dictionary,
    imports: Vec<ObjectId>,
    exports: Vec<ObjectId>,
    scripts: Vec<ObjectId>,
    toplevel_class: Option<ClassId>,
    // None caches a failed lookup as well
    resolved_names: AHashMap<ObjectId, Option<ObjectId>>,
    exported_names: AHashMap<ObjectId, Option<ObjectId>>,
}

impl Library {
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    pub fn imports(&self) -> &[ObjectId] {
        &self.imports
    }

    pub fn exports(&self) -> &[ObjectId] {
        &self.exports
    }

    pub fn scripts(&self) -> &[ObjectId] {
        &self.scripts
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    fn invalidate_name_caches(&mut self) {
        self.resolved_names.clear();
        self.exported_names.clear();
    }
}

impl Visitable for Library {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_id(self.url);
        for (name, entity) in self.dictionary.iter() {
            visitor.visit_id(name);
            visitor.visit_id(entity);
        }
        visitor.visit_ids(&self.imports);
        visitor.visit_ids(&self.exports);
        visitor.visit_ids(&self.scripts);
    }
}

// `@` followed by digits, stable for a url and distinct per library index
fn private_key_for(url: &str, index: usize) -> String {
    let mut hasher = StringHasher::default();
    for unit in url.encode_utf16() {
        hasher.add(u32::from(unit));
    }
    hasher.add(index as u32);
    format!("@{}", hasher.finish() % 10_000_000)
}

impl Isolate {
    pub fn new_library(&self, url: &str) -> ObjectResult<ObjectId> {
        let url_symbol = self.symbol(url)?;
        let index = self.libraries().len();
        let library = self.allocate(
            Library {
                url: url_symbol,
                index,
                private_key: private_key_for(url, index),
                dictionary: Dictionary::new(),
                imports: Vec::new(),
                exports: Vec::new(),
                scripts: Vec::new(),
                toplevel_class: None,
                resolved_names: AHashMap::new(),
                exported_names: AHashMap::new(),
            },
            Space::Old,
        )?;
        let registered = self.register_library(library);
        debug_assert_eq!(registered, index);
        log::debug!("registered library {url} as #{index}");
        Ok(library)
    }

    pub fn library_url(&self, library: ObjectId) -> String {
        let url = self.heap().read::<Library, _>(library, |l| l.url);
        self.heap().string_value(url)
    }

    pub fn library_private_key(&self, library: ObjectId) -> String {
        self.heap()
            .read::<Library, _>(library, |l| l.private_key.clone())
    }

    pub fn lookup_library(&self, url: &str) -> Option<ObjectId> {
        let url = self.lookup_symbol(url)?;
        self.libraries()
            .into_iter()
            .find(|&library| self.heap().read::<Library, _>(library, |l| l.url) == url)
    }

    fn name_hash(&self, name: ObjectId) -> u32 {
        self.heap().read::<StringObject, _>(name, StringObject::hash)
    }

    /// Adds a top level entity. Lookup caches of every library are dropped,
    /// a re-export may now resolve differently.
    pub fn add_library_object(&self, library: ObjectId, name: &str, entity: ObjectId) -> ObjectResult<()> {
        let name = self.symbol(name)?;
        let hash = self.name_hash(name);
        // rehash keys before locking the library, they are other objects
        let keys: Vec<(ObjectId, u32)> = self.heap().read::<Library, _>(library, |l| {
            l.dictionary.iter().map(|(key, _)| key).collect::<Vec<_>>()
        })
        .into_iter()
        .map(|key| (key, self.name_hash(key)))
        .collect();
        self.heap().write::<Library, _>(library, |l| {
            l.dictionary.insert(name, hash, entity, |key| {
                keys.iter()
                    .find(|(k, _)| *k == key)
                    .map_or(hash, |&(_, h)| h)
            });
        });
        for other in self.libraries() {
            self.heap().write::<Library, _>(other, Library::invalidate_name_caches);
        }
        Ok(())
    }

    pub fn lookup_local_object(&self, library: ObjectId, name: &str) -> Option<ObjectId> {
        let name = self.lookup_symbol(name)?;
        let hash = self.name_hash(name);
        self.heap()
            .read::<Library, _>(library, |l| l.dictionary.get(name, hash))
    }

    pub fn new_namespace(&self, target: ObjectId, show: Option<&[&str]>, hide: &[&str]) -> ObjectResult<ObjectId> {
        let to_owned = |names: &[&str]| names.iter().map(|n| (*n).to_owned()).collect::<Vec<_>>();
        self.allocate(
            Namespace::new(target, show.map(to_owned), to_owned(hide)),
            Space::Old,
        )
    }

    /// Import counts are encoded in 16 bits, more is a compile error of the
    /// importing library.
    pub fn add_import(&self, library: ObjectId, namespace: ObjectId) -> ObjectResult<()> {
        let count = self.heap().read::<Library, _>(library, |l| l.imports.len());
        if count >= MAX_IMPORTS {
            return Err(ObjectError::Language(LanguageError::new(
                LanguageErrorKind::Compilation,
                format!("too many imports in library '{}'", self.library_url(library)),
            )));
        }
        self.heap().write::<Library, _>(library, |l| {
            l.imports.push(namespace);
            l.invalidate_name_caches();
        });
        Ok(())
    }

    pub fn add_export(&self, library: ObjectId, namespace: ObjectId) {
        self.heap().write::<Library, _>(library, |l| {
            l.exports.push(namespace);
            l.invalidate_name_caches();
        });
    }

    /// Entity exported by `library` under `name`, directly or through
    /// re-exports.
    pub fn lookup_reexport(&self, library: ObjectId, name: &str) -> Option<ObjectId> {
        let symbol = self.lookup_symbol(name)?;
        if let Some(cached) = self
            .heap()
            .read::<Library, _>(library, |l| l.exported_names.get(&symbol).copied())
        {
            return cached;
        }
        let found = self.lookup_reexport_with_trail(library, name, &mut Vec::new());
        self.heap().write::<Library, _>(library, |l| {
            l.exported_names.insert(symbol, found);
        });
        found
    }

    fn lookup_reexport_with_trail(
        &self,
        library: ObjectId,
        name: &str,
        trail: &mut Vec<ObjectId>,
    ) -> Option<ObjectId> {
        if trail.contains(&library) {
            // export cycle
            return None;
        }
        trail.push(library);
        let exports = self.heap().read::<Library, _>(library, |l| l.exports.clone());
        let mut found = None;
        for export in exports {
            let (target, hidden) = self
                .heap()
                .read::<Namespace, _>(export, |ns| (ns.target, ns.hides(name)));
            if hidden {
                continue;
            }
            found = self
                .lookup_local_object(target, name)
                .or_else(|| self.lookup_reexport_with_trail(target, name, trail));
            if found.is_some() {
                break;
            }
        }
        trail.pop();
        found
    }

    /// Local entity or the one imported under `name`. Conflicting imports
    /// resolve to nothing.
    pub fn resolve_name(&self, library: ObjectId, name: &str) -> Option<ObjectId> {
        let symbol = self.lookup_symbol(name)?;
        if let Some(cached) = self
            .heap()
            .read::<Library, _>(library, |l| l.resolved_names.get(&symbol).copied())
        {
            return cached;
        }
        let found = self
            .lookup_local_object(library, name)
            .or_else(|| self.lookup_imported_object(library, name));
        self.heap().write::<Library, _>(library, |l| {
            l.resolved_names.insert(symbol, found);
        });
        found
    }

    fn lookup_imported_object(&self, library: ObjectId, name: &str) -> Option<ObjectId> {
        let imports = self.heap().read::<Library, _>(library, |l| l.imports.clone());
        let mut found = None;
        for import in imports {
            let (target, hidden) = self
                .heap()
                .read::<Namespace, _>(import, |ns| (ns.target, ns.hides(name)));
            if hidden {
                continue;
            }
            let Some(entity) = self
                .lookup_local_object(target, name)
                .or_else(|| self.lookup_reexport(target, name))
            else {
                continue;
            };
            match found {
                Some(previous) if previous != entity => {
                    log::debug!("'{name}' is imported ambiguously into {}", self.library_url(library));
                    return None;
                }
                _ => found = Some(entity),
            }
        }
        found
    }

    /// Class holding the top level members of `library`, created on first
    /// use.
    pub fn toplevel_class(&self, library: ObjectId) -> ObjectResult<ClassId> {
        if let Some(cid) = self.heap().read::<Library, _>(library, |l| l.toplevel_class) {
            return Ok(cid);
        }
        let cid = self.new_class(TOP_LEVEL_NAME, Some(library))?;
        self.write_class(cid, |c| c.flags |= ClassFlags::TOP_LEVEL);
        self.ensure_is_finalized(cid)?;
        self.heap()
            .write::<Library, _>(library, |l| l.toplevel_class = Some(cid));
        Ok(cid)
    }

    // ── scripts ────────────────────────────────────────────────────

    pub fn new_script(&self, url: &str, source: Option<&str>) -> ObjectResult<ObjectId> {
        let url = self.symbol(url)?;
        self.allocate(Script::new(url, source.map(Into::into)), Space::Old)
    }

    pub fn add_script(&self, library: ObjectId, script: ObjectId) {
        self.heap()
            .write::<Library, _>(library, |l| l.scripts.push(script));
    }

    pub fn script_url(&self, script: ObjectId) -> String {
        let url = self.heap().read::<Script, _>(script, |s| s.url);
        self.heap().string_value(url)
    }

    /// Line, column and line text of `pos`. A script without resident
    /// source borrows it from a loaded script with the same url.
    pub fn script_location(&self, script: ObjectId, pos: TokenPosition) -> Option<(usize, usize, String)> {
        let locate = |script: ObjectId| {
            self.heap().read::<Script, _>(script, |s| {
                let (line, column) = s.location(pos)?;
                Some((line, column, s.line_text(line)?.to_owned()))
            })
        };
        let (url, has_source) = self
            .heap()
            .read::<Script, _>(script, |s| (s.url, s.source().is_some()));
        if has_source {
            return locate(script);
        }
        let sibling = self.libraries().into_iter().find_map(|library| {
            self.heap().read::<Library, _>(library, |l| {
                l.scripts.iter().copied().find(|&candidate| {
                    candidate != script
                        && self
                            .heap()
                            .read::<Script, _>(candidate, |s| s.url == url && s.source().is_some())
                })
            })
        })?;
        let source = self
            .heap()
            .read::<Script, _>(sibling, |s| s.source().cloned())?;
        self.heap().write::<Script, _>(script, |s| s.set_source(source));
        locate(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FunctionKind, testing::*};

    fn entity(isolate: &Isolate, name: &str) -> ObjectId {
        isolate
            .new_function(name, FunctionKind::Regular, ClassId::OBJECT, isolate.dynamic_type())
            .unwrap()
    }

    #[test]
    fn dictionary_grows_at_three_quarters() {
        let isolate = test_isolate();
        let library = isolate.new_library("package:a/a").unwrap();
        let capacity = |isolate: &Isolate| {
            isolate
                .heap()
                .read::<Library, _>(library, |l| l.dictionary().capacity())
        };
        for i in 0..7 {
            let name = format!("f{i}");
            let fun = entity(&isolate, &name);
            isolate.add_library_object(library, &name, fun).unwrap();
            if i == 5 {
                assert_eq!(capacity(&isolate), 8, "six of eight slots is exactly 3/4");
            }
        }
        assert_eq!(capacity(&isolate), 16);
        for i in 0..7 {
            assert!(isolate.lookup_local_object(library, &format!("f{i}")).is_some());
        }
        assert_eq!(isolate.lookup_local_object(library, "missing"), None);
    }

    #[test]
    fn private_keys_differ_per_library() {
        let isolate = test_isolate();
        let a = isolate.new_library("package:a/a").unwrap();
        let b = isolate.new_library("package:b/b").unwrap();
        let key_a = isolate.library_private_key(a);
        assert!(key_a.starts_with('@'));
        assert!(key_a[1..].bytes().all(|b| b.is_ascii_digit()));
        assert_ne!(key_a, isolate.library_private_key(b));
        assert_eq!(isolate.lookup_library("package:b/b"), Some(b));
    }

    #[test]
    fn imports_respect_show_and_hide() {
        let isolate = test_isolate();
        let lib = isolate.new_library("package:lib/lib").unwrap();
        let app = isolate.new_library("package:app/main").unwrap();
        let shown = entity(&isolate, "shown");
        let hidden = entity(&isolate, "hidden");
        isolate.add_library_object(lib, "shown", shown).unwrap();
        isolate.add_library_object(lib, "hidden", hidden).unwrap();
        let import = isolate.new_namespace(lib, None, &["hidden"]).unwrap();
        isolate.add_import(app, import).unwrap();

        assert_eq!(isolate.resolve_name(app, "shown"), Some(shown));
        assert_eq!(isolate.resolve_name(app, "hidden"), None);
        let getter = isolate.new_namespace(lib, Some(&["shown"]), &[]).unwrap();
        let ns = isolate.heap().read::<Namespace, _>(getter, |ns| {
            (ns.hides("get:shown"), ns.hides("set:shown"), ns.hides("hidden"))
        });
        assert_eq!(ns, (false, false, true));
    }

    #[test]
    fn reexports_follow_chains_and_survive_cycles() {
        let isolate = test_isolate();
        let a = isolate.new_library("package:x/a").unwrap();
        let b = isolate.new_library("package:x/b").unwrap();
        let c = isolate.new_library("package:x/c").unwrap();
        let deep = entity(&isolate, "deep");
        isolate.add_library_object(c, "deep", deep).unwrap();
        let b_exports_c = isolate.new_namespace(c, None, &[]).unwrap();
        let a_exports_b = isolate.new_namespace(b, None, &[]).unwrap();
        let b_exports_a = isolate.new_namespace(a, None, &[]).unwrap();
        isolate.add_export(b, b_exports_c);
        isolate.add_export(a, a_exports_b);
        isolate.add_export(b, b_exports_a);

        assert_eq!(isolate.lookup_reexport(a, "deep"), Some(deep));
        assert_eq!(isolate.lookup_reexport(a, "deep"), Some(deep), "cached");
        assert_eq!(isolate.lookup_reexport(a, "nothing"), None);
    }

    #[test]
    fn caches_are_invalidated_by_new_objects() {
        let isolate = test_isolate();
        let lib = isolate.new_library("package:lib/lib").unwrap();
        let app = isolate.new_library("package:app/main").unwrap();
        let import = isolate.new_namespace(lib, None, &[]).unwrap();
        isolate.add_import(app, import).unwrap();
        let late = entity(&isolate, "late");
        assert_eq!(isolate.resolve_name(app, "late"), None);
        isolate.add_library_object(lib, "late", late).unwrap();
        assert_eq!(isolate.resolve_name(app, "late"), Some(late));
    }

    #[test]
    fn conflicting_imports_are_ambiguous() {
        let isolate = test_isolate();
        let one = isolate.new_library("package:one/one").unwrap();
        let two = isolate.new_library("package:two/two").unwrap();
        let app = isolate.new_library("package:app/main").unwrap();
        isolate.add_library_object(one, "f", entity(&isolate, "f")).unwrap();
        isolate.add_library_object(two, "f", entity(&isolate, "f")).unwrap();
        for target in [one, two] {
            let ns = isolate.new_namespace(target, None, &[]).unwrap();
            isolate.add_import(app, ns).unwrap();
        }
        assert_eq!(isolate.resolve_name(app, "f"), None);
    }

    #[test]
    fn script_source_is_borrowed_from_siblings() {
        let isolate = test_isolate();
        let library = isolate.new_library("package:s/s").unwrap();
        let loaded = isolate
            .new_script("package:s/s", Some("main() {\n  foo();\n}\n"))
            .unwrap();
        isolate.add_script(library, loaded);
        let stripped = isolate.new_script("package:s/s", None).unwrap();
        let location = isolate.script_location(stripped, TokenPosition(11));
        assert_eq!(location, Some((2, 3, "  foo();".to_owned())));
        assert_eq!(isolate.script_url(stripped), "package:s/s");
    }

    #[test]
    fn toplevel_class_is_created_once() {
        let isolate = test_isolate();
        let library = isolate.new_library("package:t/t").unwrap();
        let cid = isolate.toplevel_class(library).unwrap();
        assert_eq!(isolate.toplevel_class(library).unwrap(), cid);
        assert!(isolate.is_top_level_class(cid));
        assert_eq!(isolate.class_name(cid), "");
    }
}
