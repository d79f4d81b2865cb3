use std::ffi::OsString;
use std::fs;
use std::os::fd::{ AsRawFd, RawFd };
use std::path::{ Path, PathBuf };
use log::warn;
use nix::errno::Errno;
use nix::sys::inotify::{ AddWatchFlags, InitFlags, Inotify };
use nix::unistd::gethostname;

use crate::mdnsd_error::MdnsdError;
use crate::responder::HostIdentity;

pub fn read_identity(path: &Path) -> Result<HostIdentity, MdnsdError>
{
    let contents = fs::read_to_string(path).map_err(MdnsdError::HostnameError)?;

    let identity = HostIdentity::new(&contents);
    if identity.is_empty()
    {
        return Err(MdnsdError::InvalidHostname);
    }

    Ok(identity)
}

pub fn kernel_identity() -> Result<HostIdentity, MdnsdError>
{
    let name = gethostname()?;

    let identity = HostIdentity::new(&name.to_string_lossy());
    if identity.is_empty()
    {
        return Err(MdnsdError::InvalidHostname);
    }

    Ok(identity)
}

// The host name file, or the kernel host name when the file is unusable.
pub fn initial_identity(path: &Path) -> Result<HostIdentity, MdnsdError>
{
    match read_identity(path)
    {
        Ok(identity) => Ok(identity),
        Err(err) =>
        {
            warn!("Could not read {}: {}, using the kernel host name", path.display(), err);
            kernel_identity()
        }
    }
}

// Watches the directory of the host name file, since editors and hostnamectl
// replace the file instead of writing it in place.
pub struct HostnameWatcher
{
    inotify: Inotify,
    path: PathBuf,
    file_name: OsString
}

impl HostnameWatcher
{
    pub fn new(path: &Path) -> Result<HostnameWatcher, MdnsdError>
    {
        let file_name = match path.file_name()
        {
            Some(name) => name.to_os_string(),
            None => return Err(MdnsdError::InvalidHostname)
        };

        let directory = match path.parent()
        {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new(".")
        };

        let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)?;
        inotify.add_watch(directory, AddWatchFlags::IN_CLOSE_WRITE | AddWatchFlags::IN_MOVED_TO | AddWatchFlags::IN_CREATE)?;

        Ok(HostnameWatcher
        {
            inotify,
            path: path.to_path_buf(),
            file_name
        })
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }

    // Consumes all pending events, true if any of them named the host name file.
    pub fn drain(&self) -> Result<bool, MdnsdError>
    {
        let mut changed = false;

        loop
        {
            match self.inotify.read_events()
            {
                Ok(events) =>
                {
                    if events.is_empty()
                    {
                        break;
                    }

                    changed |= events.iter().any(|event| event.name.as_deref() == Some(self.file_name.as_os_str()));
                },
                Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(err.into())
            }
        }

        Ok(changed)
    }

    pub fn reload(&self) -> Result<HostIdentity, MdnsdError>
    {
        read_identity(&self.path)
    }
}

impl AsRawFd for HostnameWatcher
{
    fn as_raw_fd(&self) -> RawFd
    {
        self.inotify.as_raw_fd()
    }
}
