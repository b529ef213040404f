//! Resource directory.
//!
//! Resources are stored as a tree of directories. Each directory is a 16-byte header followed
//! by its entries, named entries first and ID entries after them. An entry is two 32-bit
//! fields:
//!
//! - the first holds either a numeric ID or, with the high bit set, the offset of a
//!   length-prefixed UTF-16 name;
//! - the second holds either the offset of a 16-byte data entry or, with the high bit set, the
//!   offset of a sub-directory.
//!
//! Offsets are relative to the start of the resource directory. By convention the tree has
//! three levels (type, name, language), but nothing here depends on that: a directory is
//! followed until data entries are reached, bounded by [`ParseOptions::max_resource_depth`].
//!
//! [`ResourceDirectory`] is a lazy handle that decodes entries when they are asked for,
//! [`ResourceDirectory::load`] materializes the whole tree, and [`ResourceDirectory::walk`]
//! flattens it into a pre-order sequence.
//!
//! # Example
//!
//! ```rust,no_run
//! use pescope::PeFile;
//!
//! let file = PeFile::from_file("app.exe".as_ref())?;
//! if let Some(root) = file.resource_root()? {
//!     for item in root.walk() {
//!         println!("{}", item?);
//!     }
//! }
//! # Ok::<(), pescope::Error>(())
//! ```
//!
//! [`ParseOptions::max_resource_depth`]: crate::pe::ParseOptions::max_resource_depth

use std::fmt;

use strum::FromRepr;
use widestring::U16String;

use crate::{
    file::{parser::Parser, PeFile},
    pe::LocatedDirectory,
    AddressError, Error, Result,
};

const DIRECTORY_HEADER_SIZE: usize = 16;
const ENTRY_SIZE: usize = 8;
const DATA_ENTRY_SIZE: usize = 16;
const HIGH_BIT: u32 = 0x8000_0000;

/// Well-known resource type IDs, found on the first level of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, strum::Display)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum ResourceType {
    Cursor = 1,
    Bitmap = 2,
    Icon = 3,
    Menu = 4,
    Dialog = 5,
    String = 6,
    #[strum(to_string = "Font directory")]
    FontDir = 7,
    Font = 8,
    Accelerator = 9,
    #[strum(to_string = "RC data")]
    RcData = 10,
    #[strum(to_string = "Message table")]
    MessageTable = 11,
    #[strum(to_string = "Group cursor")]
    GroupCursor = 12,
    #[strum(to_string = "Group icon")]
    GroupIcon = 14,
    Version = 16,
    #[strum(to_string = "Dialog include")]
    DlgInclude = 17,
    #[strum(to_string = "Plug and Play")]
    PlugPlay = 19,
    #[strum(to_string = "VxD")]
    Vxd = 20,
    #[strum(to_string = "Animated cursor")]
    AniCursor = 21,
    #[strum(to_string = "Animated icon")]
    AniIcon = 22,
    #[strum(to_string = "HTML")]
    Html = 23,
    Manifest = 24,
}

/// The fixed header of a resource directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDirectoryHeader {
    /// Reserved, normally 0
    pub characteristics: u32,
    /// Time the resource data was created by the resource compiler
    pub time_date_stamp: u32,
    /// Major version, user defined
    pub major_version: u16,
    /// Minor version, user defined
    pub minor_version: u16,
    /// Number of entries keyed by name, which come first
    pub number_of_named_entries: u16,
    /// Number of entries keyed by ID, which follow the named ones
    pub number_of_id_entries: u16,
}

impl ResourceDirectoryHeader {
    fn parse(parser: &mut Parser) -> Result<Self> {
        Ok(ResourceDirectoryHeader {
            characteristics: parser.read_le::<u32>()?,
            time_date_stamp: parser.read_le::<u32>()?,
            major_version: parser.read_le::<u16>()?,
            minor_version: parser.read_le::<u16>()?,
            number_of_named_entries: parser.read_le::<u16>()?,
            number_of_id_entries: parser.read_le::<u16>()?,
        })
    }

    /// Total number of entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        usize::from(self.number_of_named_entries) + usize::from(self.number_of_id_entries)
    }
}

/// The key of a resource entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceName {
    /// A UTF-16 name
    Name(U16String),
    /// A numeric ID
    Id(u32),
}

impl ResourceName {
    /// The numeric ID, if this is one.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        match self {
            ResourceName::Id(id) => Some(*id),
            ResourceName::Name(_) => None,
        }
    }

    /// The name, lossily converted to UTF-8, if this is one.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        match self {
            ResourceName::Name(name) => Some(name.to_string_lossy()),
            ResourceName::Id(_) => None,
        }
    }

    /// Returns true if this key matches the string `name`.
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        match self {
            ResourceName::Name(value) => value.as_slice().iter().copied().eq(name.encode_utf16()),
            ResourceName::Id(_) => false,
        }
    }
}

impl From<u32> for ResourceName {
    fn from(id: u32) -> Self {
        ResourceName::Id(id)
    }
}

impl From<&str> for ResourceName {
    fn from(name: &str) -> Self {
        ResourceName::Name(U16String::from_str(name))
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceName::Name(name) => write!(f, "\"{}\"", name.to_string_lossy()),
            ResourceName::Id(id) => write!(f, "ID {id}"),
        }
    }
}

/// A leaf of the resource tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceData {
    /// RVA of the resource bytes
    pub data_rva: u32,
    /// Size of the resource bytes
    pub size: u32,
    /// Code page used to decode code point values within the resource
    pub code_page: u32,
    /// Reserved, normally 0
    pub reserved: u32,
}

impl fmt::Display for ResourceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "code page {}, {} bytes at RVA {:#x}",
            self.code_page, self.size, self.data_rva
        )
    }
}

/// A lazy handle on one directory of the resource tree.
#[derive(Debug, Clone)]
pub struct ResourceDirectory<'a> {
    file: &'a PeFile,
    directory: LocatedDirectory,
    offset: u32,
    depth: usize,
    header: ResourceDirectoryHeader,
}

impl<'a> ResourceDirectory<'a> {
    /// Decode the root directory header.
    ///
    /// # Errors
    /// Returns [`Error::TruncatedInput`] if the header is cut short.
    pub(crate) fn root(file: &'a PeFile, directory: LocatedDirectory) -> Result<Self> {
        Self::at(file, directory, 0, 0)
    }

    fn at(file: &'a PeFile, directory: LocatedDirectory, offset: u32, depth: usize) -> Result<Self> {
        let header = read_relative(
            file,
            &directory,
            offset,
            DIRECTORY_HEADER_SIZE,
            ResourceDirectoryHeader::parse,
        )?;

        Ok(ResourceDirectory {
            file,
            directory,
            offset,
            depth,
            header,
        })
    }

    /// The directory header.
    #[must_use]
    pub fn header(&self) -> &ResourceDirectoryHeader {
        &self.header
    }

    /// Offset of this directory, relative to the resource directory start.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Nesting depth, 0 for the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.header.entry_count()
    }

    /// Returns true if the directory has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode entry `index`, `Ok(None)` if out of range.
    ///
    /// # Errors
    /// Returns an error if the entry, its name or the node it points to cannot be decoded.
    pub fn get(&self, index: usize) -> Result<Option<ResourceEntry<'a>>> {
        if index >= self.len() {
            return Ok(None);
        }
        self.entry(index).map(Some)
    }

    /// Start a new pass over the entries of this directory.
    #[must_use]
    pub fn entries(&self) -> ResourceEntries<'a> {
        ResourceEntries {
            directory: self.clone(),
            index: 0,
            done: false,
        }
    }

    /// Decode this directory and everything below it.
    ///
    /// # Errors
    /// Returns the first error met anywhere in the subtree.
    pub fn load(&self) -> Result<ResourceTree> {
        let mut entries = Vec::with_capacity(self.len());
        for entry in self.entries() {
            let entry = entry?;
            let node = match entry.node {
                ResourceNode::Directory(directory) => ResourceTreeNode::Directory(directory.load()?),
                ResourceNode::Data(data) => ResourceTreeNode::Data(data),
            };
            entries.push(ResourceTreeEntry {
                name: entry.name,
                node,
            });
        }

        Ok(ResourceTree {
            header: self.header,
            entries,
        })
    }

    /// Walk the subtree below this directory in pre-order.
    ///
    /// Entries of this directory are reported at `self.depth() + 1`.
    #[must_use]
    pub fn walk(&self) -> ResourceWalker<'a> {
        ResourceWalker {
            stack: vec![self.entries()],
            done: false,
        }
    }

    fn entry(&self, index: usize) -> Result<ResourceEntry<'a>> {
        let at = self.offset as usize + DIRECTORY_HEADER_SIZE + index * ENTRY_SIZE;
        let at = u32::try_from(at).map_err(|_| AddressError::Overflow {
            base: u64::from(self.offset),
            add: (DIRECTORY_HEADER_SIZE + index * ENTRY_SIZE) as u64,
        })?;

        let (name_field, value_field) = self.read(at, ENTRY_SIZE, |parser| {
            Ok((parser.read_le::<u32>()?, parser.read_le::<u32>()?))
        })?;

        let has_name = name_field & HIGH_BIT != 0;
        if has_name != (index < usize::from(self.header.number_of_named_entries)) {
            let range = if has_name { "ID" } else { "name" };
            if self.file.options().validate_reserved_bits {
                return Err(malformed_error!(
                    "Resource entry {} at {:#x} lies in the {} range",
                    index,
                    at,
                    range
                ));
            }
            log::warn!("Resource entry {index} at {at:#x} lies in the {range} range");
        }

        let name = if has_name {
            ResourceName::Name(self.read_name(name_field & !HIGH_BIT)?)
        } else {
            ResourceName::Id(name_field)
        };

        let target = value_field & !HIGH_BIT;
        let node = if value_field & HIGH_BIT != 0 {
            let depth = self.depth + 1;
            if depth > self.file.options().max_resource_depth {
                return Err(Error::DepthExceeded {
                    limit: self.file.options().max_resource_depth,
                    offset: target,
                });
            }
            ResourceNode::Directory(Self::at(self.file, self.directory, target, depth)?)
        } else {
            ResourceNode::Data(self.read(target, DATA_ENTRY_SIZE, |parser| {
                Ok(ResourceData {
                    data_rva: parser.read_le::<u32>()?,
                    size: parser.read_le::<u32>()?,
                    code_page: parser.read_le::<u32>()?,
                    reserved: parser.read_le::<u32>()?,
                })
            })?)
        };

        Ok(ResourceEntry {
            name,
            node,
            depth: self.depth + 1,
        })
    }

    fn read_name(&self, offset: u32) -> Result<U16String> {
        let length = self.read(offset, 2, |parser| parser.read_le::<u16>())?;
        let limit = self.file.options().max_resource_name_length;

        if length == 0 || usize::from(length) > limit {
            return Err(Error::StringDecode {
                offset: self.file.sections().resolve(self.rva(offset)?)?,
                reason: format!("resource name length {length} outside 1..={limit}"),
            });
        }

        let units = self.read(offset + 2, usize::from(length) * 2, |parser| {
            parser.read_utf16_units(usize::from(length))
        })?;
        Ok(U16String::from_vec(units))
    }

    fn rva(&self, offset: u32) -> Result<u32> {
        relative_rva(&self.directory, offset)
    }

    fn read<T>(
        &self,
        offset: u32,
        len: usize,
        f: impl FnOnce(&mut Parser) -> Result<T>,
    ) -> Result<T> {
        read_relative(self.file, &self.directory, offset, len, f)
    }
}

fn relative_rva(directory: &LocatedDirectory, offset: u32) -> Result<u32> {
    directory.rva.checked_add(offset).ok_or_else(|| {
        AddressError::Overflow {
            base: u64::from(directory.rva),
            add: u64::from(offset),
        }
        .into()
    })
}

/// Run `f` over `len` bytes at `offset` from the resource directory start.
fn read_relative<T>(
    file: &PeFile,
    directory: &LocatedDirectory,
    offset: u32,
    len: usize,
    f: impl FnOnce(&mut Parser) -> Result<T>,
) -> Result<T> {
    let rva = relative_rva(directory, offset)?;
    file.parse_rva(rva, len as u32, f)
}

/// What a resource entry points to.
#[derive(Debug, Clone)]
pub enum ResourceNode<'a> {
    /// A nested directory
    Directory(ResourceDirectory<'a>),
    /// A leaf
    Data(ResourceData),
}

/// One decoded entry of a [`ResourceDirectory`].
#[derive(Debug, Clone)]
pub struct ResourceEntry<'a> {
    /// The entry key
    pub name: ResourceName,
    /// The node the entry points to
    pub node: ResourceNode<'a>,
    depth: usize,
}

impl ResourceEntry<'_> {
    /// Depth of the entry, 1 for entries of the root directory.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The well-known type this entry names, for entries of the root directory.
    #[must_use]
    pub fn resource_type(&self) -> Option<ResourceType> {
        if self.depth != 1 {
            return None;
        }
        self.name.id().and_then(ResourceType::from_repr)
    }

    /// The data this entry points to, if it is a leaf.
    #[must_use]
    pub fn data(&self) -> Option<&ResourceData> {
        match &self.node {
            ResourceNode::Data(data) => Some(data),
            ResourceNode::Directory(_) => None,
        }
    }
}

impl fmt::Display for ResourceEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resource_type() {
            Some(kind) => write!(f, "{kind} ({})", self.name)?,
            None => write!(f, "{}", self.name)?,
        }
        match &self.node {
            ResourceNode::Directory(directory) => {
                write!(f, " [directory, {} entries]", directory.len())
            }
            ResourceNode::Data(data) => write!(f, " [{data}]"),
        }
    }
}

/// Iterator over the entries of one directory.
///
/// An error is yielded once, after which the iterator is exhausted.
#[derive(Debug, Clone)]
pub struct ResourceEntries<'a> {
    directory: ResourceDirectory<'a>,
    index: usize,
    done: bool,
}

impl<'a> Iterator for ResourceEntries<'a> {
    type Item = Result<ResourceEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.index >= self.directory.len() {
            self.done = true;
            return None;
        }

        match self.directory.entry(self.index) {
            Ok(entry) => {
                self.index += 1;
                Some(Ok(entry))
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            (0, Some(0))
        } else {
            (0, Some(self.directory.len() - self.index))
        }
    }
}

impl std::iter::FusedIterator for ResourceEntries<'_> {}

impl<'a> IntoIterator for &ResourceDirectory<'a> {
    type Item = Result<ResourceEntry<'a>>;
    type IntoIter = ResourceEntries<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries()
    }
}

/// An entry produced by [`ResourceWalker`].
#[derive(Debug, Clone)]
pub struct WalkEntry<'a> {
    /// Depth of the entry, 1 for entries of the directory the walk started at
    pub depth: usize,
    /// The entry itself
    pub entry: ResourceEntry<'a>,
}

impl fmt::Display for WalkEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indent = self.depth.saturating_sub(1) * 2;
        write!(f, "{:indent$}{}", "", self.entry)
    }
}

/// Depth-first, pre-order walk over a resource subtree.
///
/// Sub-directories are opened only when the walk reaches them. An error is yielded once,
/// after which the walk is over.
#[derive(Debug, Clone)]
pub struct ResourceWalker<'a> {
    stack: Vec<ResourceEntries<'a>>,
    done: bool,
}

impl<'a> Iterator for ResourceWalker<'a> {
    type Item = Result<WalkEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let depth = self.stack.len();
            let Some(top) = self.stack.last_mut() else {
                self.done = true;
                return None;
            };

            match top.next() {
                None => {
                    self.stack.pop();
                }
                Some(Err(error)) => {
                    self.done = true;
                    self.stack.clear();
                    return Some(Err(error));
                }
                Some(Ok(entry)) => {
                    if let ResourceNode::Directory(directory) = &entry.node {
                        self.stack.push(directory.entries());
                    }
                    return Some(Ok(WalkEntry { depth, entry }));
                }
            }
        }
    }
}

impl std::iter::FusedIterator for ResourceWalker<'_> {}

/// A fully decoded resource directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTree {
    /// The directory header
    pub header: ResourceDirectoryHeader,
    /// The entries, named first
    pub entries: Vec<ResourceTreeEntry>,
}

impl ResourceTree {
    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the directory has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry with key `name`.
    #[must_use]
    pub fn find(&self, name: &ResourceName) -> Option<&ResourceTreeEntry> {
        self.entries.iter().find(|entry| &entry.name == name)
    }

    /// Follow `path` from this directory, one key per level.
    #[must_use]
    pub fn lookup(&self, path: &[ResourceName]) -> Option<&ResourceTreeNode> {
        let (first, rest) = path.split_first()?;
        let entry = self.find(first)?;
        match (&entry.node, rest.is_empty()) {
            (node, true) => Some(node),
            (ResourceTreeNode::Directory(tree), false) => tree.lookup(rest),
            (ResourceTreeNode::Data(_), false) => None,
        }
    }

    /// Every leaf in the subtree, in pre-order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&ResourceData> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'t>(&'t self, out: &mut Vec<&'t ResourceData>) {
        for entry in &self.entries {
            match &entry.node {
                ResourceTreeNode::Directory(tree) => tree.collect_leaves(out),
                ResourceTreeNode::Data(data) => out.push(data),
            }
        }
    }
}

/// One entry of a [`ResourceTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTreeEntry {
    /// The entry key
    pub name: ResourceName,
    /// The node the entry points to
    pub node: ResourceTreeNode,
}

/// A node of a [`ResourceTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceTreeNode {
    /// A nested directory
    Directory(ResourceTree),
    /// A leaf
    Data(ResourceData),
}
