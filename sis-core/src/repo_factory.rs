use crate::error::Result;
use crate::repo::{OpenParams, TableRepo};
use crate::repo_fs::CsvTableRepo;

pub enum Backend {
    Csv,
}

pub fn open_repo(backend: Backend, p: OpenParams) -> Result<Box<dyn TableRepo>> {
    match backend {
        Backend::Csv => Ok(Box::new(CsvTableRepo::new(p))),
    }
}
