//! Shapes the collected fields and files into a [`ParsedForm`].

use std::collections::BTreeMap;

use crate::{FileRecord, FormFields};

/// How uploaded files are presented in a [`ParsedForm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// No files are accepted.
    None,

    /// At most one file, under a single field name.
    Single,

    /// All files in arrival order.
    List,

    /// Files grouped by field name. Every listed name is present in the output.
    Groups(Vec<String>),
}

/// Uploaded files, shaped according to the parser's [`Strategy`].
#[derive(Debug)]
pub enum UploadedFiles {
    None,
    Single(Option<FileRecord>),
    List(Vec<FileRecord>),
    Groups(BTreeMap<String, Vec<FileRecord>>),
}

impl UploadedFiles {
    /// Returns the file of a [`Strategy::Single`] parser.
    pub fn single(&self) -> Option<&FileRecord> {
        match self {
            UploadedFiles::Single(file) => file.as_ref(),
            _ => None,
        }
    }

    /// Returns the files of a [`Strategy::List`] parser.
    pub fn list(&self) -> Option<&[FileRecord]> {
        match self {
            UploadedFiles::List(files) => Some(files),
            _ => None,
        }
    }

    /// Returns the files uploaded under `name` for a [`Strategy::Groups`] parser.
    pub fn group(&self, name: &str) -> Option<&[FileRecord]> {
        match self {
            UploadedFiles::Groups(groups) => groups.get(name).map(Vec::as_slice),
            _ => None,
        }
    }

    /// Returns the total number of files.
    pub fn len(&self) -> usize {
        match self {
            UploadedFiles::None => 0,
            UploadedFiles::Single(file) => usize::from(file.is_some()),
            UploadedFiles::List(files) => files.len(),
            UploadedFiles::Groups(groups) => groups.values().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens into a list of files, dropping the grouping.
    pub fn into_vec(self) -> Vec<FileRecord> {
        match self {
            UploadedFiles::None => Vec::new(),
            UploadedFiles::Single(file) => file.into_iter().collect(),
            UploadedFiles::List(files) => files,
            UploadedFiles::Groups(groups) => groups.into_values().flatten().collect(),
        }
    }
}

/// A fully read form.
#[derive(Debug)]
pub struct ParsedForm {
    pub fields: FormFields,
    pub files: UploadedFiles,
}

/// Builds the parsed form from text fields and files, both in arrival order.
pub fn assemble(
    strategy: &Strategy,
    fields: Vec<(String, String)>,
    files: Vec<FileRecord>,
) -> ParsedForm {
    let fields = fields.into_iter().collect();

    let files = match strategy {
        Strategy::None => UploadedFiles::None,
        Strategy::Single => UploadedFiles::Single(files.into_iter().last()),
        Strategy::List => UploadedFiles::List(files),
        Strategy::Groups(names) => {
            let mut groups: BTreeMap<_, _> = names
                .iter()
                .map(|name| (name.clone(), Vec::new()))
                .collect();

            for file in files {
                match groups.get_mut(&file.field_name) {
                    Some(group) => group.push(file),
                    None => log::warn!("dropping file for unknown group {:?}", file.field_name),
                }
            }

            UploadedFiles::Groups(groups)
        }
    };

    ParsedForm { fields, files }
}
