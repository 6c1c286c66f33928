use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use inecore::{ContainerEngine, FileBlockDevice, Result, VirtualFile};

/// Magic identifier containers created by this tool are stamped with.
const CONTAINER_IDENTIFIER: &[u8] = b"Inesonic, LLC.\nAleph";

fn open_engine(container: &Path) -> Result<ContainerEngine<FileBlockDevice>> {
    let device = FileBlockDevice::open(container)?;
    let (engine, outcome) = ContainerEngine::open(device, CONTAINER_IDENTIFIER, false)?;
    if let inecore::OpenOutcome::Downlevel {
        found_major,
        supported_major,
    } = outcome
    {
        log::warn!(
            "{} is format version {found_major}, this build supports up to {supported_major}; opening anyway",
            container.display()
        );
    }
    Ok(engine)
}

/// `VirtualFile::open` lazily creates the stream it's asked for, which is
/// right for `put` but wrong for `cat`/`rm`/`mv`: a name the container
/// doesn't know about should fail loudly, not spring into existence as an
/// empty stream the moment the container is next closed.
fn require_stream(engine: &mut ContainerEngine<FileBlockDevice>, name: &str) -> Result<()> {
    match engine.stream_id_for(name)? {
        Some(_) => Ok(()),
        None => Err(inecore::Error::StreamNotFound {
            name: name.to_string(),
        }),
    }
}

pub fn handle_init(container: PathBuf) -> Result<()> {
    let mut engine = open_engine(&container)?;
    engine.close()?;
    eprintln!("init: created {}", container.display());
    Ok(())
}

pub fn handle_list(container: PathBuf) -> Result<()> {
    let mut engine = open_engine(&container)?;
    let mut names = engine.directory()?;
    names.sort();
    for name in names {
        let f = VirtualFile::open(&mut engine, &name)?;
        println!("{:>10}  {}", f.size()?, name);
    }
    engine.close()?;
    Ok(())
}

pub fn handle_cat(container: PathBuf, name: String) -> Result<()> {
    let mut engine = open_engine(&container)?;
    require_stream(&mut engine, &name)?;
    let mut f = VirtualFile::open(&mut engine, &name)?;
    f.set_position(0)?;
    let mut out = std::io::stdout().lock();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
    }
    drop(f);
    engine.close()?;
    Ok(())
}

pub fn handle_put(container: PathBuf, name: String, src: PathBuf) -> Result<()> {
    let mut engine = open_engine(&container)?;
    let mut f = VirtualFile::open(&mut engine, &name)?;
    f.set_position(0)?;
    f.truncate()?;

    let mut src_file = std::fs::File::open(&src)?;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = src_file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        f.write(&buf[..n])?;
    }
    f.flush()?;
    drop(f);
    engine.close()?;
    eprintln!("put: {} -> {}:{}", src.display(), container.display(), name);
    Ok(())
}

pub fn handle_rm(container: PathBuf, name: String) -> Result<()> {
    let mut engine = open_engine(&container)?;
    require_stream(&mut engine, &name)?;
    let f = VirtualFile::open(&mut engine, &name)?;
    f.erase()?;
    engine.close()?;
    eprintln!("rm: {name}");
    Ok(())
}

pub fn handle_mv(container: PathBuf, from: String, to: String) -> Result<()> {
    let mut engine = open_engine(&container)?;
    require_stream(&mut engine, &from)?;
    let mut f = VirtualFile::open(&mut engine, &from)?;
    f.rename(&to)?;
    drop(f);
    engine.close()?;
    eprintln!("mv: {from} -> {to}");
    Ok(())
}
