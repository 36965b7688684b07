//! File descriptor hand-off over UNIX sockets (SCM_RIGHTS).
//!
//! The `fd` transport needs one end of a socket pair inside the source VM.
//! The descriptor travels as ancillary data on a UNIX stream; a tag
//! travels with it so the receiver can register it under a name.

use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use async_trait::async_trait;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::socket::{
    recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags, UnixAddr,
};
use tokio::io::Interest;
use tokio::net::UnixStream;

use crate::ExecutorError;

/// Longest tag [`ScmRightsChannel`] can carry (length is one byte).
pub const MAX_TAG_LEN: usize = u8::MAX as usize;

/// A channel that can move file descriptors between processes.
///
/// Platforms or peers without descriptor passing report
/// [`ExecutorError::DescriptorTransferUnsupported`] instead of failing
/// opaquely.
#[async_trait]
pub trait DescriptorChannel: Send {
    /// Send `fd` to the peer, labelled with `tag`.
    ///
    /// # Errors
    /// Returns [`ExecutorError::DescriptorTransferUnsupported`] if the peer
    /// cannot take descriptors, or [`ExecutorError::Io`] on socket errors.
    async fn send(&mut self, fd: BorrowedFd<'_>, tag: &str) -> Result<(), ExecutorError>;

    /// Receive a descriptor and its tag.
    ///
    /// # Errors
    /// Returns [`ExecutorError::DescriptorTransferUnsupported`] if this side
    /// never receives descriptors, or [`ExecutorError::Protocol`] if the
    /// message carried no descriptor.
    async fn receive(&mut self) -> Result<(OwnedFd, String), ExecutorError>;
}

/// Descriptor channel over a connected UNIX stream.
///
/// Each message is one length byte, the tag, and exactly one descriptor.
#[derive(Debug)]
pub struct ScmRightsChannel {
    stream: UnixStream,
}

impl ScmRightsChannel {
    /// Wrap a connected stream.
    #[must_use]
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// A connected pair of channels.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Io`] if `socketpair` fails.
    pub fn pair() -> Result<(Self, Self), ExecutorError> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::new(a), Self::new(b)))
    }
}

#[async_trait]
impl DescriptorChannel for ScmRightsChannel {
    async fn send(&mut self, fd: BorrowedFd<'_>, tag: &str) -> Result<(), ExecutorError> {
        let len = u8::try_from(tag.len()).map_err(|_| {
            ExecutorError::Protocol(format!("descriptor tag longer than {MAX_TAG_LEN} bytes"))
        })?;
        let mut payload = Vec::with_capacity(tag.len() + 1);
        payload.push(len);
        payload.extend_from_slice(tag.as_bytes());

        send_scm_rights(&self.stream, &payload, fd.as_raw_fd()).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<(OwnedFd, String), ExecutorError> {
        let mut buf = [0u8; MAX_TAG_LEN + 1];
        let (n, fd) = recv_scm_rights(&self.stream, &mut buf).await?;
        if n == 0 {
            return Err(ExecutorError::Protocol("descriptor channel closed".to_owned()));
        }
        let fd = fd.ok_or_else(|| ExecutorError::Protocol("message carried no descriptor".to_owned()))?;

        let len = usize::from(buf[0]);
        let tag = buf
            .get(1..=len)
            .filter(|_| len < n)
            .ok_or_else(|| ExecutorError::Protocol("truncated descriptor tag".to_owned()))?;
        let tag = String::from_utf8(tag.to_vec())
            .map_err(|_| ExecutorError::Protocol("descriptor tag is not UTF-8".to_owned()))?;
        Ok((fd, tag))
    }
}

/// Write `payload` with `fd` attached as `SCM_RIGHTS` ancillary data.
pub(crate) async fn send_scm_rights(
    stream: &UnixStream,
    payload: &[u8],
    fd: RawFd,
) -> io::Result<()> {
    loop {
        stream.writable().await?;
        let sent = stream.try_io(Interest::WRITABLE, || {
            let iov = [IoSlice::new(payload)];
            let fds = [fd];
            let cmsgs = [ControlMessage::ScmRights(&fds)];
            sendmsg::<UnixAddr>(stream.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)
                .map_err(io::Error::from)
        });
        match sent {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Read into `buf`, collecting at most one `SCM_RIGHTS` descriptor.
///
/// Extra descriptors in the same message are closed.
pub(crate) async fn recv_scm_rights(
    stream: &UnixStream,
    buf: &mut [u8],
) -> io::Result<(usize, Option<OwnedFd>)> {
    loop {
        stream.readable().await?;
        let received = stream.try_io(Interest::READABLE, || {
            let mut iov = [IoSliceMut::new(buf)];
            let mut space = nix::cmsg_space!([RawFd; 1]);
            let msg = recvmsg::<UnixAddr>(
                stream.as_raw_fd(),
                &mut iov,
                Some(&mut space),
                MsgFlags::MSG_CMSG_CLOEXEC,
            )
            .map_err(io::Error::from)?;

            let mut received = None;
            for cmsg in msg.cmsgs().map_err(io::Error::from)? {
                if let ControlMessageOwned::ScmRights(fds) = cmsg {
                    for raw in fds {
                        // SAFETY: the kernel installed this descriptor for us
                        // during recvmsg; nothing else owns it.
                        let owned = unsafe { OwnedFd::from_raw_fd(raw) };
                        received.get_or_insert(owned);
                    }
                }
            }
            Ok((msg.bytes, received))
        });
        match received {
            Ok(result) => return Ok(result),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Set or clear close-on-exec on `fd`.
///
/// # Errors
/// Returns [`ExecutorError::Io`] if `fcntl` fails.
pub fn set_inheritable(fd: BorrowedFd<'_>, inheritable: bool) -> Result<(), ExecutorError> {
    let raw = fd.as_raw_fd();
    let mut flags = FdFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFD)?);
    flags.set(FdFlag::FD_CLOEXEC, !inheritable);
    fcntl(raw, FcntlArg::F_SETFD(flags))?;
    Ok(())
}

/// Whether `fd` survives `exec`.
///
/// # Errors
/// Returns [`ExecutorError::Io`] if `fcntl` fails.
pub fn is_inheritable(fd: BorrowedFd<'_>) -> Result<bool, ExecutorError> {
    let flags = FdFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFD)?);
    Ok(!flags.contains(FdFlag::FD_CLOEXEC))
}

/// A connected socket pair for the `fd` transport.
///
/// The incoming end is inherited by the destination process; the
/// outgoing end is sent to the source over its control channel. Each end
/// is handed off exactly once: [`DescriptorPair::into_parts`] consumes the
/// pair.
#[derive(Debug)]
pub struct DescriptorPair {
    outgoing: OwnedFd,
    incoming: OwnedFd,
}

impl DescriptorPair {
    /// Create the pair and make the incoming end inheritable.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Io`] if `socketpair` or `fcntl` fail.
    pub fn new() -> Result<Self, ExecutorError> {
        let (outgoing, incoming) = std::os::unix::net::UnixStream::pair()?;
        let incoming = OwnedFd::from(incoming);
        set_inheritable(incoming.as_fd(), true)?;
        Ok(Self { outgoing: outgoing.into(), incoming })
    }

    /// Raw number of the incoming end, as the destination will see it.
    #[must_use]
    pub fn incoming_raw(&self) -> RawFd {
        self.incoming.as_raw_fd()
    }

    /// Split into `(outgoing, incoming)`.
    #[must_use]
    pub fn into_parts(self) -> (OwnedFd, OwnedFd) {
        (self.outgoing, self.incoming)
    }
}
